//! Cache command - inspect and trim the build cache

use crate::cache::{
    format_bytes, BuildManager, CacheSizeStatus, CachedBuildRecord, EvictionSummary,
};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::BisectResult;
use crate::ui::{self, UiContext};
use console::style;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> BisectResult<()> {
    let manager = BuildManager::open(config.storage.settings())?;
    debug!(path = %config.storage.storage_path.display(), "Opened build cache");

    let result = match args.action {
        CacheAction::List { format } => list_builds(&manager, format),
        CacheAction::Evict => evict_builds(&manager),
        CacheAction::Clear { yes } => clear_builds(&manager, yes).await,
    };
    manager.close()?;
    result
}

/// List cached builds, least recently used first
fn list_builds(manager: &BuildManager, format: OutputFormat) -> BisectResult<()> {
    let builds = manager.enumerate()?;

    match format {
        OutputFormat::Table => print_build_table(&builds, manager.quota()),
        OutputFormat::Json => print_build_json(&builds)?,
        OutputFormat::Plain => print_build_plain(&builds),
    }

    Ok(())
}

fn print_build_table(builds: &[CachedBuildRecord], quota: u64) {
    if builds.is_empty() {
        println!("No cached builds.");
        return;
    }

    println!(
        "{:<44} {:>10} {:<8} {:<20}",
        "BUILD", "SIZE", "STATE", "LAST USED"
    );
    println!("{}", "-".repeat(84));

    for build in builds {
        let state = if build.in_use {
            style("in use").yellow().to_string()
        } else {
            style("idle").dim().to_string()
        };
        println!(
            "{:<44} {:>10} {:<8} {:<20}",
            build.prefix,
            format_bytes(build.size),
            state,
            build.last_access.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = builds.iter().map(|b| b.size).sum();
    println!();
    println!(
        "Total: {} build(s), {}",
        builds.len(),
        usage_line(total, quota)
    );
}

/// `1.2 GB of 29.3 GB (4%)`, colored by how close the cache is to its quota
fn usage_line(total: u64, quota: u64) -> String {
    if quota == 0 {
        return format_bytes(total);
    }
    let text = format!(
        "{} of {} ({:.0}%)",
        format_bytes(total),
        format_bytes(quota),
        CacheSizeStatus::percentage(total, quota)
    );
    match CacheSizeStatus::from_usage(total, quota) {
        CacheSizeStatus::Ok => text,
        CacheSizeStatus::Warning => style(text).yellow().to_string(),
        CacheSizeStatus::Exceeded => style(text).red().to_string(),
    }
}

fn print_build_json(builds: &[CachedBuildRecord]) -> BisectResult<()> {
    #[derive(serde::Serialize)]
    struct BuildJson<'a> {
        prefix: &'a str,
        path: String,
        size: u64,
        last_access: String,
        in_use: bool,
    }

    let json_builds: Vec<BuildJson<'_>> = builds
        .iter()
        .map(|b| BuildJson {
            prefix: &b.prefix,
            path: b.path.display().to_string(),
            size: b.size,
            last_access: b.last_access.to_rfc3339(),
            in_use: b.in_use,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_builds)?);
    Ok(())
}

fn print_build_plain(builds: &[CachedBuildRecord]) {
    for build in builds {
        println!("{}", build.prefix);
    }
}

/// Evict least recently used builds until the cache fits its quota
fn evict_builds(manager: &BuildManager) -> BisectResult<()> {
    let ctx = UiContext::detect();
    let summary = manager.evict()?;
    print_summary(&ctx, &summary, "evicted");
    Ok(())
}

/// Remove every build that is not in use
async fn clear_builds(manager: &BuildManager, yes: bool) -> BisectResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let builds = manager.enumerate()?;
    let idle: Vec<&CachedBuildRecord> = builds.iter().filter(|b| !b.in_use).collect();

    if idle.is_empty() {
        println!("No cached builds to clear.");
        return Ok(());
    }

    println!("This will remove {} cached build(s):", idle.len());
    for build in &idle {
        println!("  {} {}", style("•").red(), build.prefix);
    }
    println!();

    if !ui::confirm(&ctx, "Remove these builds?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let summary = manager.purge_unused()?;
    print_summary(&ctx, &summary, "cleared");
    Ok(())
}

fn print_summary(ctx: &UiContext, summary: &EvictionSummary, verb: &str) {
    if summary.removed.is_empty() {
        ui::step_info(ctx, "Nothing to remove");
    } else {
        ui::step_ok(
            ctx,
            &format!(
                "{} {} build(s), reclaimed {}",
                verb,
                summary.removed.len(),
                format_bytes(summary.reclaimed_bytes)
            ),
        );
    }
    if summary.protected > 0 || summary.busy > 0 {
        ui::step_warn_hint(
            ctx,
            &format!(
                "{} build(s) in use, {} locked by another process",
                summary.protected, summary.busy
            ),
            "Run again once other bisections finish",
        );
    }
    ui::key_value(ctx, "cache size", &format_bytes(summary.remaining_bytes));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_line_without_quota() {
        assert_eq!(usage_line(0, 0), format_bytes(0));
    }

    #[test]
    fn usage_line_with_quota() {
        let line = console::strip_ansi_codes(&usage_line(900, 1000)).to_string();
        assert!(line.ends_with("(90%)"), "{}", line);
    }

    #[test]
    fn summary_non_interactive() {
        let ctx = UiContext::non_interactive();
        let summary = EvictionSummary {
            removed: vec!["central-2023-01-01-opt".to_string()],
            reclaimed_bytes: 1024,
            protected: 1,
            busy: 0,
            remaining_bytes: 2048,
        };
        print_summary(&ctx, &summary, "evicted");
    }
}
