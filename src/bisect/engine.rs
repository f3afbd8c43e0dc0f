//! Bisection control loop
//!
//! ```text
//! INIT -> VERIFY (optional) -> PROBE -> {NARROW | SKIP} -> PROBE ... -> DONE
//! ```
//!
//! The window is tracked as two indices into the range: `upper`, the earliest
//! build known to show the target verdict (BAD when hunting a regression,
//! GOOD when hunting a fix), and `lower`, the latest build known not to. The
//! end of the range is assumed to show the target verdict unless verified;
//! nothing is assumed about the start. Candidates are the indices strictly
//! between the two.

use crate::bisect::evaluator::Evaluator;
use crate::bisect::verdict::{Evaluation, RepeatPolicy, Verdict};
use crate::build::{BuildDescriptor, BuildRange};
use crate::cache::BuildManager;
use crate::error::{BisectError, BisectResult};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What the bisection is looking for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// First build that reproduces
    #[default]
    Regression,
    /// First build that no longer reproduces
    Fix,
}

impl Direction {
    /// Verdict the culprit shows
    pub fn target(&self) -> Verdict {
        match self {
            Self::Regression => Verdict::Bad,
            Self::Fix => Verdict::Good,
        }
    }

    /// Verdict builds before the culprit show
    pub fn baseline(&self) -> Verdict {
        match self {
            Self::Regression => Verdict::Good,
            Self::Fix => Verdict::Bad,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regression => write!(f, "regression"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

/// Caller-supplied run options
#[derive(Debug, Clone)]
pub struct BisectOptions {
    pub direction: Direction,
    /// Evaluate both boundaries before probing
    pub verify: bool,
    pub repeat: RepeatPolicy,
    /// Consecutive SKIP verdicts tolerated before giving up
    pub skip_budget: usize,
}

impl Default for BisectOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Regression,
            verify: false,
            repeat: RepeatPolicy::default(),
            skip_budget: 3,
        }
    }
}

/// Per-run search state. Never persisted.
#[derive(Debug, Clone)]
pub struct BisectionState {
    lower: Option<usize>,
    upper: usize,
    direction: Direction,
    skipped: BTreeSet<usize>,
    consecutive_skips: usize,
    skip_budget: usize,
}

impl BisectionState {
    pub fn new(len: usize, options: &BisectOptions) -> Self {
        Self {
            lower: None,
            upper: len.saturating_sub(1),
            direction: options.direction,
            skipped: BTreeSet::new(),
            consecutive_skips: 0,
            skip_budget: options.skip_budget,
        }
    }

    /// Latest index known to show the baseline verdict
    pub fn lower(&self) -> Option<usize> {
        self.lower
    }

    /// Earliest index known to show the target verdict
    pub fn upper(&self) -> usize {
        self.upper
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn skipped(&self) -> &BTreeSet<usize> {
        &self.skipped
    }

    /// Both boundaries confirmed: the start becomes the known baseline
    fn mark_verified(&mut self) {
        self.lower = Some(0);
    }

    fn first_candidate(&self) -> usize {
        self.lower.map_or(0, |l| l + 1)
    }

    /// Number of candidate indices left between the bounds
    pub fn remaining(&self) -> usize {
        self.upper.saturating_sub(self.first_candidate())
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Skipped indices still inside the window. When these are all that is
    /// left, the culprit is one of them or `upper`.
    pub fn unresolved(&self) -> impl Iterator<Item = usize> + '_ {
        self.skipped
            .range(self.first_candidate()..self.upper)
            .copied()
    }

    /// Window holds candidates but every one of them was skipped
    pub fn is_exhausted(&self) -> bool {
        !self.is_done() && self.unresolved().count() == self.remaining()
    }

    /// Index to probe next: the midpoint of the current window, or the
    /// nearest unskipped neighbour (above first, then below). `None` once the
    /// window is resolved or holds only skipped builds.
    pub fn next_probe(&self, range: &BuildRange) -> BisectResult<Option<usize>> {
        if self.is_done() || self.is_exhausted() {
            return Ok(None);
        }
        let first = self.first_candidate();
        let mid = first + range.slice(first, self.upper)?.mid_point();

        for distance in 0..self.remaining() {
            let above = mid + distance;
            if above < self.upper && !self.skipped.contains(&above) {
                return Ok(Some(above));
            }
            if distance > 0 && mid >= first + distance && !self.skipped.contains(&(mid - distance)) {
                return Ok(Some(mid - distance));
            }
        }

        Ok(None)
    }

    /// Narrow the window with the verdict observed at `index`
    pub fn apply(&mut self, index: usize, verdict: Verdict) -> BisectResult<()> {
        if verdict == Verdict::Skip {
            self.skipped.insert(index);
            self.consecutive_skips += 1;
            if self.consecutive_skips > self.skip_budget {
                return Err(BisectError::NoUsableBuild {
                    skips: self.consecutive_skips,
                });
            }
            return Ok(());
        }

        self.consecutive_skips = 0;
        if verdict == self.direction.target() {
            self.upper = index;
        } else {
            self.lower = Some(index);
        }
        Ok(())
    }
}

/// One evaluated build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub index: usize,
    pub build: BuildDescriptor,
    pub verdict: Verdict,
    pub diagnostics: String,
}

/// Result of a completed bisection
#[derive(Debug, Clone)]
pub struct BisectOutcome {
    pub direction: Direction,
    /// First build showing the target verdict
    pub culprit: BuildDescriptor,
    /// Latest build known to show the baseline verdict; `None` when the
    /// culprit is the first build of the range
    pub last_baseline: Option<BuildDescriptor>,
    /// Skipped builds between `last_baseline` and `culprit`. Non-empty means
    /// the culprit is the first of these that shows the target verdict, or
    /// `culprit` itself.
    pub unresolved: Vec<BuildDescriptor>,
    /// Boundary evaluations made in verify mode
    pub verification: Vec<ProbeRecord>,
    /// Bisection probes in order, SKIPs included
    pub probes: Vec<ProbeRecord>,
    pub skipped: Vec<BuildDescriptor>,
    pub elapsed: Duration,
}

impl BisectOutcome {
    /// Whether unusable builds prevented pinning down a single culprit
    pub fn is_ambiguous(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

/// Callback invoked after every probe with the record and the candidates left
pub type ProbeCallback<'a> = Box<dyn Fn(&ProbeRecord, usize) + Send + Sync + 'a>;

/// Drives a [`BuildManager`] and an [`Evaluator`] over a [`BuildRange`]
pub struct Bisector<'a> {
    manager: &'a BuildManager,
    evaluator: &'a dyn Evaluator,
    testcase: PathBuf,
    options: BisectOptions,
    on_probe: Option<ProbeCallback<'a>>,
}

impl<'a> Bisector<'a> {
    pub fn new(
        manager: &'a BuildManager,
        evaluator: &'a dyn Evaluator,
        testcase: impl Into<PathBuf>,
        options: BisectOptions,
    ) -> Self {
        Self {
            manager,
            evaluator,
            testcase: testcase.into(),
            options,
            on_probe: None,
        }
    }

    pub fn on_probe(mut self, callback: ProbeCallback<'a>) -> Self {
        self.on_probe = Some(callback);
        self
    }

    pub fn options(&self) -> &BisectOptions {
        &self.options
    }

    pub fn testcase(&self) -> &Path {
        &self.testcase
    }

    /// Bisect `range` until the culprit and its predecessor are adjacent
    pub async fn run(&self, range: &BuildRange) -> BisectResult<BisectOutcome> {
        let started = Instant::now();
        let mut state = BisectionState::new(range.len(), &self.options);
        let mut verification = vec![];
        let mut probes = vec![];

        info!(
            direction = %self.options.direction,
            builds = range.len(),
            start = %range.first(),
            end = %range.last(),
            "Starting bisection"
        );

        if range.is_resolved() {
            info!("Range holds a single build, nothing to bisect");
        } else if self.options.verify {
            verification = self.verify(range).await?;
            state.mark_verified();
        }

        while let Some(index) = state.next_probe(range)? {
            let build = &range[index];
            let evaluation = self.probe(build).await?;
            info!(
                build = %build,
                verdict = %evaluation.verdict,
                runs = evaluation.runs,
                "Probe finished"
            );

            let record = ProbeRecord {
                index,
                build: build.clone(),
                verdict: evaluation.verdict,
                diagnostics: evaluation.diagnostics,
            };
            state.apply(index, record.verdict)?;
            if let Some(callback) = &self.on_probe {
                callback(&record, state.remaining());
            }
            probes.push(record);
        }

        let outcome = BisectOutcome {
            direction: self.options.direction,
            culprit: range[state.upper()].clone(),
            last_baseline: state.lower().map(|i| range[i].clone()),
            unresolved: state.unresolved().map(|i| range[i].clone()).collect(),
            verification,
            probes,
            skipped: state.skipped().iter().map(|&i| range[i].clone()).collect(),
            elapsed: started.elapsed(),
        };

        if outcome.is_ambiguous() {
            warn!(
                unresolved = outcome.unresolved.len(),
                "Skipped builds remain next to the culprit"
            );
        }
        info!(
            culprit = %outcome.culprit,
            probes = outcome.probes.len(),
            elapsed_secs = outcome.elapsed.as_secs(),
            "Bisection complete"
        );
        Ok(outcome)
    }

    /// Evaluate both boundaries and fail fast on the wrong polarity
    async fn verify(&self, range: &BuildRange) -> BisectResult<Vec<ProbeRecord>> {
        let direction = self.options.direction;
        let boundaries = [
            ("start", 0, direction.baseline()),
            ("end", range.len() - 1, direction.target()),
        ];

        let mut records = vec![];
        for (label, index, expected) in boundaries {
            let build = &range[index];
            let evaluation = self.probe(build).await?;
            info!(boundary = label, build = %build, verdict = %evaluation.verdict, "Verified boundary");

            if evaluation.verdict != expected {
                return Err(BisectError::BoundaryVerification {
                    boundary: label.to_string(),
                    build: build.prefix(),
                    expected: expected.to_string(),
                    actual: evaluation.verdict.to_string(),
                });
            }
            records.push(ProbeRecord {
                index,
                build: build.clone(),
                verdict: evaluation.verdict,
                diagnostics: evaluation.diagnostics,
            });
        }
        Ok(records)
    }

    /// Acquire, materialize, evaluate, release. Artifact failures become SKIP.
    async fn probe(&self, build: &BuildDescriptor) -> BisectResult<Evaluation> {
        let lease = self.manager.acquire(build)?;

        let result = match self.manager.materialize(build).await {
            Ok(path) => {
                self.evaluator
                    .evaluate(&path, &self.testcase, &self.options.repeat)
                    .await
            }
            Err(e) => Err(e),
        };
        let result = match result {
            Err(e) if e.is_skippable() => {
                warn!("Skipping {}: {}", build, e);
                Ok(Evaluation::skip(e.to_string()))
            }
            other => other,
        };

        let released = lease.release();
        let evaluation = result?;
        released?;
        Ok(evaluation)
    }
}
