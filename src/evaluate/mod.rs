//! Shell evaluation: run a build's binary on the testcase and classify it

pub mod capability;
pub mod command;
pub mod level;

pub use capability::CapabilityCache;
pub use command::CommandEvaluator;
pub use level::{classify, Classification, Level};
