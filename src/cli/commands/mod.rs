//! CLI command implementations

pub mod bisect;
pub mod cache;
pub mod config;

pub use bisect::execute as bisect;
pub use cache::execute as cache;
pub use config::execute as config;
