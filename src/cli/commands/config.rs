//! Config command - show or edit configuration

use crate::bisect::Aggregation;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{BisectError, BisectResult};
use crate::evaluate::Level;
use crate::ui::{self, UiContext};
use clap::ValueEnum;
use std::path::PathBuf;

/// Keys accepted by `config set`
const VALID_KEYS: &[&str] = &[
    "general.log-format",
    "storage.storage-path",
    "storage.persist",
    "storage.persist-limit",
    "storage.stale-lock-secs",
    "bisect.count",
    "bisect.aggregation",
    "bisect.skip-budget",
    "fetch.command",
    "evaluator.binary",
    "evaluator.args",
    "evaluator.optional-flags",
    "evaluator.probe-args",
    "evaluator.timeout-secs",
    "evaluator.min-level",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    config: &Config,
) -> BisectResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> BisectResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> BisectResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok(
        &ctx,
        &format!("Configuration initialized at {}", path.display()),
    );

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> BisectResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    apply(&mut config, key, value)?;
    config.validate()?;

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Set a dot-separated kebab-case key on `config`
fn apply(config: &mut Config, key: &str, value: &str) -> BisectResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log-format"] => config.general.log_format = value.to_string(),

        ["storage", "storage-path"] => config.storage.storage_path = PathBuf::from(value),
        ["storage", "persist"] => config.storage.persist = parse_bool(value)?,
        ["storage", "persist-limit"] => config.storage.persist_limit = parse_number(value)?,
        ["storage", "stale-lock-secs"] => config.storage.stale_lock_secs = parse_number(value)?,

        ["bisect", "count"] => config.bisect.count = parse_number(value)?,
        ["bisect", "aggregation"] => config.bisect.aggregation = parse_aggregation(value)?,
        ["bisect", "skip-budget"] => config.bisect.skip_budget = parse_number(value)?,

        ["fetch", "command"] => config.fetch.command = parse_words(value),

        ["evaluator", "binary"] => config.evaluator.binary = value.to_string(),
        ["evaluator", "args"] => config.evaluator.args = parse_words(value),
        ["evaluator", "optional-flags"] => config.evaluator.optional_flags = parse_words(value),
        ["evaluator", "probe-args"] => config.evaluator.probe_args = parse_words(value),
        ["evaluator", "timeout-secs"] => config.evaluator.timeout_secs = parse_number(value)?,
        ["evaluator", "min-level"] => {
            config.evaluator.min_level = Level::from_str(value, true)
                .map_err(|e| BisectError::Configuration(format!("Invalid level: {}", e)))?
        }

        _ => {
            return Err(BisectError::Configuration(format!(
                "Unknown config key: {} (valid keys: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

/// Whitespace-separated list, e.g. `"fetch-build --out {dest}"`
fn parse_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_bool(value: &str) -> BisectResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(BisectError::Configuration(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> BisectResult<T> {
    value
        .parse()
        .map_err(|_| BisectError::Configuration(format!("Invalid number: {}", value)))
}

fn parse_aggregation(value: &str) -> BisectResult<Aggregation> {
    match value {
        "first-bad-wins" => Ok(Aggregation::FirstBadWins),
        "unanimous" => Ok(Aggregation::Unanimous),
        _ => Err(BisectError::Configuration(format!(
            "Invalid aggregation: {}. Use first-bad-wins or unanimous",
            value
        ))),
    }
}
