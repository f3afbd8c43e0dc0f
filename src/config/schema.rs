//! Configuration schema for autobisect
//!
//! Configuration is stored at `~/.config/autobisect/config.toml`

use crate::bisect::{Aggregation, RepeatPolicy};
use crate::cache::{mb_to_bytes, CacheSettings};
use crate::error::{BisectError, BisectResult};
use crate::evaluate::Level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build cache settings
    pub storage: StorageConfig,

    /// Bisection policy
    pub bisect: BisectConfig,

    /// Fetch collaborator
    pub fetch: FetchConfig,

    /// Evaluator settings
    pub evaluator: EvaluatorConfig,
}

impl Config {
    /// Reject settings that cannot work
    pub fn validate(&self) -> BisectResult<()> {
        if self.storage.storage_path.as_os_str().is_empty() {
            return Err(BisectError::Configuration(
                "storage.storage-path must not be empty".to_string(),
            ));
        }
        if self.storage.persist && self.storage.persist_limit == 0 {
            return Err(BisectError::Configuration(
                "storage.persist-limit must be positive when persist is enabled".to_string(),
            ));
        }
        if self.bisect.count == 0 {
            return Err(BisectError::Configuration(
                "bisect.count must be at least 1".to_string(),
            ));
        }
        if self.evaluator.binary.trim().is_empty() {
            return Err(BisectError::Configuration(
                "evaluator.binary must not be empty".to_string(),
            ));
        }
        if self.evaluator.timeout_secs == 0 {
            return Err(BisectError::Configuration(
                "evaluator.timeout-secs must be positive".to_string(),
            ));
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(BisectError::Configuration(format!(
                "general.log-format must be \"text\" or \"json\", got \"{}\"",
                self.general.log_format
            )));
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Cache root directory
    pub storage_path: PathBuf,

    /// Keep builds across runs
    pub persist: bool,

    /// Quota in MB, used only when `persist` is set
    pub persist_limit: u64,

    /// Ledger rows older than this may be reclaimed from dead holders
    pub stale_lock_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("autobisect"),
            persist: true,
            persist_limit: 30_000,
            stale_lock_secs: 86_400,
        }
    }
}

impl StorageConfig {
    /// Quota in bytes; 0 when persistence is disabled
    pub fn persist_limit_bytes(&self) -> u64 {
        if self.persist {
            mb_to_bytes(self.persist_limit)
        } else {
            0
        }
    }

    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            storage_path: self.storage_path.clone(),
            persist: self.persist,
            persist_limit: self.persist_limit_bytes(),
            stale_after_secs: self.stale_lock_secs,
        }
    }
}

/// Bisection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BisectConfig {
    /// Evaluations per probe
    pub count: u32,

    /// How repeated evaluations combine
    pub aggregation: Aggregation,

    /// Consecutive SKIP verdicts tolerated
    pub skip_budget: usize,
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self {
            count: 1,
            aggregation: Aggregation::FirstBadWins,
            skip_budget: 3,
        }
    }
}

impl BisectConfig {
    pub fn repeat_policy(&self) -> BisectResult<RepeatPolicy> {
        RepeatPolicy::new(self.count, self.aggregation)
    }
}

/// Fetch collaborator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Argv template; placeholders `{id}` `{branch}` `{flags}` `{prefix}` `{dest}`
    pub command: Vec<String>,
}

/// Evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EvaluatorConfig {
    /// Binary to run, relative to the build directory
    pub binary: String,

    /// Arguments placed before the testcase
    pub args: Vec<String>,

    /// Flags passed only to builds that accept them
    pub optional_flags: Vec<String>,

    /// Arguments following a flag when probing support for it
    pub probe_args: Vec<String>,

    /// Per-run timeout
    pub timeout_secs: u64,

    /// Minimum level that counts as reproducing
    pub min_level: Level,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            binary: "js".to_string(),
            args: vec![],
            optional_flags: vec![],
            probe_args: vec!["-e".to_string(), "42".to_string()],
            timeout_secs: 120,
            min_level: Level::KnownCrash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[storage]"));
        assert!(toml.contains("persist-limit = 30000"));
        assert!(toml.contains("aggregation = \"first-bad-wins\""));
        assert!(toml.contains("min-level = \"known-crash\""));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.storage.persist);
        assert_eq!(config.bisect.skip_budget, 3);
        config.validate().unwrap();
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [storage]
            storage-path = "/tmp/builds"
            persist-limit = 10

            [evaluator]
            min-level = "new-assert-or-crash"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.storage_path, PathBuf::from("/tmp/builds"));
        assert_eq!(config.storage.persist_limit_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.evaluator.min_level, Level::NewAssertOrCrash);
        assert_eq!(config.evaluator.binary, "js"); // default preserved
    }

    #[test]
    fn quota_ignored_without_persistence() {
        let storage = StorageConfig {
            persist: false,
            ..Default::default()
        };
        assert_eq!(storage.persist_limit_bytes(), 0);
        assert_eq!(storage.settings().persist_limit, 0);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.bisect.count = 0;
        assert!(matches!(
            config.validate(),
            Err(BisectError::Configuration(_))
        ));

        let mut config = Config::default();
        config.storage.persist_limit = 0;
        assert!(config.validate().is_err());
        config.storage.persist = false;
        config.validate().unwrap();

        let mut config = Config::default();
        config.storage.storage_path = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.general.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
