//! Error types for autobisect
//!
//! All modules use `BisectResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for autobisect operations
pub type BisectResult<T> = Result<T, BisectError>;

/// All errors that can occur while bisecting or managing the build cache
#[derive(Error, Debug)]
pub enum BisectError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Boundary errors
    #[error("Invalid boundary value '{value}': {reason}")]
    InvalidBoundary { value: String, reason: String },

    // Range errors
    #[error("Build range is empty")]
    EmptyRange,

    #[error("Build not found in range: {0}")]
    NotFound(String),

    // Per-probe artifact errors (recovered as SKIP)
    #[error("No build available for {0}")]
    NoBuildAvailable(String),

    #[error("Failed to fetch build {prefix}: {reason}")]
    Fetch { prefix: String, reason: String },

    #[error("Failed to compile build {prefix}: {reason}")]
    Compile { prefix: String, reason: String },

    // Run-level errors
    #[error("No usable build found after {skips} consecutive skipped probes")]
    NoUsableBuild { skips: usize },

    #[error("Boundary verification failed: {boundary} build {build} evaluated {actual}, expected {expected}")]
    BoundaryVerification {
        boundary: String,
        build: String,
        expected: String,
        actual: String,
    },

    #[error("Testcase cannot be evaluated: {0}")]
    EvaluatorFatal(String),

    // Cache errors
    #[error("Cache ledger and storage disagree: {0}")]
    CacheCorruption(String),

    #[error("Build {0} is already in use")]
    AlreadyInUse(String),

    #[error("Cache ledger is closed")]
    LedgerClosed,

    #[error("Cache ledger error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Interrupted")]
    Interrupted,

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BisectError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a fetch error for a build prefix
    pub fn fetch(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }

    /// Whether a probe that failed with this error should be treated as SKIP
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::NoBuildAvailable(_) | Self::Fetch { .. } | Self::Compile { .. }
        )
    }

    /// Name of the stage this error belongs to, used in the final report
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_)
            | Self::ConfigInvalid { .. }
            | Self::ConfigDirCreate { .. }
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => "configuration",
            Self::InvalidBoundary { .. } => "boundaries",
            Self::EmptyRange | Self::NotFound(_) => "range",
            Self::BoundaryVerification { .. } => "verification",
            Self::NoBuildAvailable(_)
            | Self::Fetch { .. }
            | Self::Compile { .. }
            | Self::NoUsableBuild { .. }
            | Self::Interrupted => "bisection",
            Self::EvaluatorFatal(_) => "evaluation",
            Self::CacheCorruption(_)
            | Self::AlreadyInUse(_)
            | Self::LedgerClosed
            | Self::Sqlite(_) => "cache",
            Self::Io { .. } | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidBoundary { .. } => {
                Some("Boundaries must be YYYY-MM-DD dates or 12-40 character hex revisions")
            }
            Self::BoundaryVerification { .. } => {
                Some("Check the testcase against both boundary builds, or drop --verify")
            }
            Self::NoUsableBuild { .. } => {
                Some("Widen the range or raise bisect.skip-budget in the config")
            }
            Self::CacheCorruption(_) => Some("Run: autobisect cache clear"),
            Self::Configuration(_) | Self::ConfigInvalid { .. } => {
                Some("Run: autobisect config show")
            }
            _ => None,
        }
    }
}
