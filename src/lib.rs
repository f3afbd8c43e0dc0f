//! autobisect - find the build that introduced or fixed a crash
//!
//! Binary-searches an ordered range of builds with an external evaluator,
//! keeping fetched builds in a quota-limited cache that several processes
//! can share.

pub mod bisect;
pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluate;
pub(crate) mod process;
pub mod ui;

pub use error::{BisectError, BisectResult};
