//! Probe outcomes and how repeated runs are combined

use crate::error::{BisectError, BisectResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of evaluating one build against the testcase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Testcase did not reproduce
    Good,
    /// Testcase reproduced
    Bad,
    /// Build could not be produced or evaluated meaningfully
    Skip,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Bad => "BAD",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A verdict plus free-form diagnostics from the evaluator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub diagnostics: String,
    /// Number of runs the verdict was aggregated from
    pub runs: u32,
}

impl Evaluation {
    pub fn new(verdict: Verdict, diagnostics: impl Into<String>) -> Self {
        Self {
            verdict,
            diagnostics: diagnostics.into(),
            runs: 1,
        }
    }

    pub fn good(diagnostics: impl Into<String>) -> Self {
        Self::new(Verdict::Good, diagnostics)
    }

    pub fn bad(diagnostics: impl Into<String>) -> Self {
        Self::new(Verdict::Bad, diagnostics)
    }

    pub fn skip(diagnostics: impl Into<String>) -> Self {
        Self::new(Verdict::Skip, diagnostics)
    }
}

/// How the verdicts of repeated runs are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// Any BAD run makes the probe BAD; remaining runs are skipped
    #[default]
    FirstBadWins,
    /// Every decisive run must be BAD
    Unanimous,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstBadWins => write!(f, "first-bad-wins"),
            Self::Unanimous => write!(f, "unanimous"),
        }
    }
}

/// Repeat count and aggregation for one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatPolicy {
    pub count: u32,
    pub aggregation: Aggregation,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        Self {
            count: 1,
            aggregation: Aggregation::FirstBadWins,
        }
    }
}

impl RepeatPolicy {
    pub fn new(count: u32, aggregation: Aggregation) -> BisectResult<Self> {
        if count == 0 {
            return Err(BisectError::Configuration(
                "repeat count must be at least 1".to_string(),
            ));
        }
        Ok(Self { count, aggregation })
    }

    /// Whether the runs so far already fix the aggregated verdict
    pub fn is_decided(&self, runs: &[Verdict]) -> bool {
        if runs.len() >= self.count as usize {
            return true;
        }
        match self.aggregation {
            Aggregation::FirstBadWins => runs.contains(&Verdict::Bad),
            Aggregation::Unanimous => runs.contains(&Verdict::Good),
        }
    }

    /// Combine run verdicts. Runs that were all SKIP stay SKIP.
    pub fn aggregate(&self, runs: &[Verdict]) -> Verdict {
        let bad = runs.iter().filter(|v| **v == Verdict::Bad).count();
        let good = runs.iter().filter(|v| **v == Verdict::Good).count();

        match self.aggregation {
            Aggregation::FirstBadWins if bad > 0 => Verdict::Bad,
            Aggregation::Unanimous if bad > 0 && good == 0 => Verdict::Bad,
            _ if good > 0 => Verdict::Good,
            _ => Verdict::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Verdict::*;

    #[test]
    fn zero_count_rejected() {
        assert!(RepeatPolicy::new(0, Aggregation::FirstBadWins).is_err());
    }

    #[test]
    fn first_bad_wins() {
        let policy = RepeatPolicy::new(3, Aggregation::FirstBadWins).unwrap();
        assert_eq!(policy.aggregate(&[Good, Bad]), Bad);
        assert_eq!(policy.aggregate(&[Good, Good, Good]), Good);
        assert_eq!(policy.aggregate(&[Skip, Good]), Good);
        assert_eq!(policy.aggregate(&[Skip, Skip, Skip]), Skip);

        assert!(policy.is_decided(&[Good, Bad]));
        assert!(!policy.is_decided(&[Good, Good]));
        assert!(policy.is_decided(&[Good, Good, Good]));
    }

    #[test]
    fn unanimous() {
        let policy = RepeatPolicy::new(3, Aggregation::Unanimous).unwrap();
        assert_eq!(policy.aggregate(&[Bad, Bad, Bad]), Bad);
        assert_eq!(policy.aggregate(&[Bad, Good]), Good);
        assert_eq!(policy.aggregate(&[Bad, Skip, Bad]), Bad);

        assert!(policy.is_decided(&[Bad, Good]));
        assert!(!policy.is_decided(&[Bad, Bad]));
    }

    #[test]
    fn aggregation_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            aggregation: Aggregation,
        }
        let w: Wrapper = toml::from_str("aggregation = \"unanimous\"").unwrap();
        assert_eq!(w.aggregation, Aggregation::Unanimous);
        assert_eq!(Aggregation::FirstBadWins.to_string(), "first-bad-wins");
    }
}
