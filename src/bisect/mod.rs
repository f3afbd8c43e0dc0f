//! Bisection engine: binary search over a build range with skip and verify
//! semantics

pub mod engine;
pub mod evaluator;
pub mod verdict;

pub use engine::{BisectOptions, BisectOutcome, BisectionState, Bisector, Direction, ProbeRecord};
pub use evaluator::Evaluator;
pub use verdict::{Aggregation, Evaluation, RepeatPolicy, Verdict};
