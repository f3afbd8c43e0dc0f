//! Build identity and ordered build ranges

pub mod descriptor;
pub mod range;

pub use descriptor::{Branch, BuildDescriptor, BuildFlags, BuildId};
pub use range::BuildRange;
