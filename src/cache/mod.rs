//! Local build cache shared by concurrent bisection runs
//!
//! Builds are stored by prefix under one storage directory and tracked in a
//! SQLite ledger. The ledger and the filesystem are kept in agreement by
//! [`BuildManager::reconcile`], which runs on every open.
//!
//! # Build states
//!
//! | State | Ledger | Filesystem |
//! |-------|--------|------------|
//! | Absent | no rows | nothing |
//! | Fetching | `download_queue` row | `tmp/<prefix>.partial` |
//! | Cached | `builds` row | `builds/<prefix>` |
//! | In use | `builds` + `in_use` rows | `builds/<prefix>` |

pub mod fetch;
pub mod ledger;
pub mod lock;
pub mod manager;

pub use fetch::{BuildFetcher, CommandFetcher};
pub use ledger::CacheLedger;
pub use manager::{
    format_bytes, mb_to_bytes, BuildLease, BuildManager, CacheSettings, CacheSizeStatus,
    CachedBuildRecord, EvictionSummary, ReconcileSummary,
};
