//! Leveled outcome taxonomy for shell runs
//!
//! Levels are ordered by severity. A run is interesting (BAD) when its level
//! reaches the configured minimum.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Markers the allocator prints when it detects heap misuse
const MALLOC_MARKERS: &[&str] = &[
    "malloc: *** error",
    "pointer being freed was not allocated",
    "double free or corruption",
    "free(): invalid pointer",
];

const ASSERTION_PREFIX: &str = "Assertion failure:";

/// Outcome severity, least to most severe
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Fine,
    #[default]
    KnownCrash,
    TimedOut,
    AbnormalExit,
    DidNotFinish,
    DecidedToExit,
    OverallMismatch,
    #[serde(rename = "valgrind-amiss")]
    #[value(name = "valgrind-amiss")]
    VgAmiss,
    MallocError,
    NewAssertOrCrash,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fine => "fine",
            Self::KnownCrash => "known-crash",
            Self::TimedOut => "timed-out",
            Self::AbnormalExit => "abnormal-exit",
            Self::DidNotFinish => "did-not-finish",
            Self::DecidedToExit => "decided-to-exit",
            Self::OverallMismatch => "overall-mismatch",
            Self::VgAmiss => "valgrind-amiss",
            Self::MallocError => "malloc-error",
            Self::NewAssertOrCrash => "new-assert-or-crash",
        }
    }

    /// Whether this level meets the `min` threshold
    pub fn is_interesting(&self, min: Level) -> bool {
        *self >= min
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal(i32),
    TimedOut,
}

/// Observed result of one run
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit: Exit,
    pub stdout: String,
    pub stderr: String,
}

/// Level plus the issues that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub level: Level,
    pub issues: Vec<String>,
}

impl Classification {
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            self.level.to_string()
        } else {
            format!("{} ({})", self.level, self.issues.join(", "))
        }
    }
}

/// Classify a run by exit status and stderr
pub fn classify(run: &RunOutput) -> Classification {
    let mut level = Level::Fine;
    let mut issues = vec![];

    if MALLOC_MARKERS.iter().any(|m| run.stderr.contains(m)) {
        issues.push("malloc error".to_string());
        level = level.max(Level::MallocError);
    }

    let mut saw_assertion = false;
    for line in run.stderr.lines() {
        if line.starts_with(ASSERTION_PREFIX) {
            issues.push(line.trim_end().to_string());
            level = level.max(Level::NewAssertOrCrash);
            saw_assertion = true;
        }
    }

    if !saw_assertion {
        match run.exit {
            Exit::Signal(signal) => {
                issues.push(format!("crashed with signal {}", signal));
                level = level.max(Level::NewAssertOrCrash);
            }
            Exit::TimedOut => {
                issues.push("timed out".to_string());
                level = level.max(Level::TimedOut);
            }
            Exit::Code(code) if code != 0 => {
                issues.push(format!("abnormal exit {}", code));
                level = level.max(Level::AbnormalExit);
            }
            Exit::Code(_) => {}
        }
    }

    Classification { level, issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(exit: Exit, stderr: &str) -> RunOutput {
        RunOutput {
            exit,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Fine < Level::KnownCrash);
        assert!(Level::TimedOut < Level::AbnormalExit);
        assert!(Level::MallocError < Level::NewAssertOrCrash);
        assert!(Level::NewAssertOrCrash.is_interesting(Level::KnownCrash));
        assert!(!Level::Fine.is_interesting(Level::KnownCrash));
    }

    #[test]
    fn clean_exit_is_fine() {
        let c = classify(&run(Exit::Code(0), ""));
        assert_eq!(c.level, Level::Fine);
        assert!(c.issues.is_empty());
        assert_eq!(c.summary(), "fine");
    }

    #[test]
    fn exit_kinds() {
        assert_eq!(classify(&run(Exit::Code(3), "")).level, Level::AbnormalExit);
        assert_eq!(classify(&run(Exit::TimedOut, "")).level, Level::TimedOut);
        assert_eq!(classify(&run(Exit::Signal(11), "")).level, Level::NewAssertOrCrash);
    }

    #[test]
    fn assertion_wins_over_exit_code() {
        let c = classify(&run(
            Exit::Code(3),
            "warning: x\nAssertion failure: !cx->isExceptionPending(), at jsapi.cpp:42\n",
        ));
        assert_eq!(c.level, Level::NewAssertOrCrash);
        assert_eq!(c.issues.len(), 1);
        assert!(c.issues[0].contains("jsapi.cpp:42"));
    }

    #[test]
    fn malloc_error_detected() {
        let c = classify(&run(
            Exit::Code(0),
            "js(123) malloc: *** error for object 0x1: pointer being freed was not allocated",
        ));
        assert_eq!(c.level, Level::MallocError);
    }

    #[test]
    fn level_names() {
        assert_eq!(Level::VgAmiss.to_string(), "valgrind-amiss");
        assert_eq!(Level::default(), Level::KnownCrash);
    }
}
