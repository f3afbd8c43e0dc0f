//! Evaluator collaborator: decides whether a build reproduces the testcase

use crate::bisect::verdict::{Evaluation, RepeatPolicy, Verdict};
use crate::error::BisectResult;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Runs a testcase against a materialized build.
///
/// Implementations report a verdict per run; [`Evaluator::evaluate`] repeats
/// runs and aggregates them. `EvaluatorFatal` from either method aborts the
/// whole bisection; `NoBuildAvailable`/`Fetch`/`Compile` are folded into SKIP.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate once
    async fn run_once(&self, build_path: &Path, testcase: &Path) -> BisectResult<Evaluation>;

    /// Evaluate up to `policy.count` times and aggregate
    async fn evaluate(
        &self,
        build_path: &Path,
        testcase: &Path,
        policy: &RepeatPolicy,
    ) -> BisectResult<Evaluation> {
        let mut runs: Vec<Verdict> = Vec::with_capacity(policy.count as usize);
        let mut evaluations = Vec::with_capacity(policy.count as usize);

        while !policy.is_decided(&runs) {
            let evaluation = self.run_once(build_path, testcase).await?;
            debug!(
                run = runs.len() + 1,
                verdict = %evaluation.verdict,
                "Evaluated {}",
                build_path.display()
            );
            runs.push(evaluation.verdict);
            evaluations.push(evaluation);
        }

        let verdict = policy.aggregate(&runs);
        let diagnostics = evaluations
            .iter()
            .rev()
            .find(|e| e.verdict == verdict)
            .or(evaluations.last())
            .map(|e| e.diagnostics.clone())
            .unwrap_or_default();

        Ok(Evaluation {
            verdict,
            diagnostics,
            runs: runs.len() as u32,
        })
    }

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bisect::verdict::Aggregation;
    use std::sync::Mutex;

    /// Returns scripted verdicts in order
    struct Scripted(Mutex<Vec<Verdict>>);

    impl Scripted {
        fn new(mut verdicts: Vec<Verdict>) -> Self {
            verdicts.reverse();
            Self(Mutex::new(verdicts))
        }

        fn remaining(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Evaluator for Scripted {
        async fn run_once(&self, _build: &Path, _testcase: &Path) -> BisectResult<Evaluation> {
            let verdict = self.0.lock().unwrap().pop().unwrap();
            Ok(Evaluation::new(verdict, format!("ran {}", verdict)))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn flaky_regression_is_caught_with_repeats() {
        let policy = RepeatPolicy::new(3, Aggregation::FirstBadWins).unwrap();
        let evaluator = Scripted::new(vec![Verdict::Good, Verdict::Bad, Verdict::Good]);

        let result = evaluator
            .evaluate(Path::new("/b"), Path::new("/t"), &policy)
            .await
            .unwrap();

        assert_eq!(result.verdict, Verdict::Bad);
        assert_eq!(result.runs, 2);
        assert_eq!(result.diagnostics, "ran BAD");
        assert_eq!(evaluator.remaining(), 1);
    }

    #[tokio::test]
    async fn single_run_by_default() {
        let evaluator = Scripted::new(vec![Verdict::Good, Verdict::Bad]);
        let result = evaluator
            .evaluate(Path::new("/b"), Path::new("/t"), &RepeatPolicy::default())
            .await
            .unwrap();

        assert_eq!(result.verdict, Verdict::Good);
        assert_eq!(result.runs, 1);
    }

    #[tokio::test]
    async fn all_runs_used_when_nothing_reproduces() {
        let policy = RepeatPolicy::new(3, Aggregation::FirstBadWins).unwrap();
        let evaluator = Scripted::new(vec![Verdict::Skip, Verdict::Good, Verdict::Skip]);

        let result = evaluator
            .evaluate(Path::new("/b"), Path::new("/t"), &policy)
            .await
            .unwrap();

        assert_eq!(result.verdict, Verdict::Good);
        assert_eq!(result.runs, 3);
    }
}
