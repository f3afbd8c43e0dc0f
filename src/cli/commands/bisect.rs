//! Bisect command - find the build that introduced or fixed a crash

use crate::bisect::{
    BisectOptions, BisectOutcome, Bisector, Direction, Evaluator, ProbeRecord, Verdict,
};
use crate::build::{Branch, BuildDescriptor, BuildFlags, BuildId, BuildRange};
use crate::cache::{BuildManager, CommandFetcher};
use crate::cli::args::BisectArgs;
use crate::config::Config;
use crate::error::{BisectError, BisectResult};
use crate::evaluate::{CapabilityCache, CommandEvaluator};
use crate::ui::{self, ProbeProgress, TaskSpinner, UiContext};
use chrono::{Duration, Local, NaiveDate};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Days between the default start boundary and today
const DEFAULT_SPAN_DAYS: i64 = 364;

/// Execute the bisect command
pub async fn execute(args: BisectArgs, config: &Config) -> BisectResult<()> {
    let ctx = UiContext::detect();

    if !args.testcase.is_file() {
        return Err(BisectError::EvaluatorFatal(format!(
            "testcase {} does not exist",
            args.testcase.display()
        )));
    }

    let mut config = config.clone();
    if let Some(count) = args.count {
        config.bisect.count = count;
    }
    if let Some(level) = args.min_level {
        config.evaluator.min_level = level;
    }
    config.validate()?;
    let fetcher = CommandFetcher::new(config.fetch.command.clone())?;

    let range = resolve_range(&args, Local::now().date_naive()).await?;
    let options = BisectOptions {
        direction: if args.find_fix {
            Direction::Fix
        } else {
            Direction::Regression
        },
        verify: args.verify,
        repeat: config.bisect.repeat_policy()?,
        skip_budget: config.bisect.skip_budget,
    };

    ui::intro(&ctx, "autobisect");
    ui::key_value(&ctx, "testcase", &args.testcase.display().to_string());
    ui::key_value(
        &ctx,
        "range",
        &format!("{} .. {} ({} builds)", range.first(), range.last(), range.len()),
    );
    ui::key_value(&ctx, "searching for", &options.direction.to_string());

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Opening build cache...");
    let manager = match BuildManager::open(config.storage.settings()) {
        Ok(manager) => manager.with_fetcher(Arc::new(fetcher)),
        Err(e) => {
            spinner.stop_error("Failed to open build cache");
            return Err(e);
        }
    };
    spinner.stop(&format!(
        "Build cache at {}",
        config.storage.storage_path.display()
    ));

    let capabilities = Arc::new(CapabilityCache::new(
        config.evaluator.probe_args.clone(),
        std::time::Duration::from_secs(config.evaluator.timeout_secs),
    ));
    let evaluator = CommandEvaluator::from_config(&config.evaluator, capabilities);

    let result = run(&ctx, &manager, &evaluator, &args.testcase, options, &range).await;
    if let Err(e) = manager.close() {
        warn!("Failed to close build cache: {}", e);
    }
    let outcome = result?;

    report(&ctx, &outcome);
    Ok(())
}

async fn run(
    ctx: &UiContext,
    manager: &BuildManager,
    evaluator: &dyn Evaluator,
    testcase: &Path,
    options: BisectOptions,
    range: &BuildRange,
) -> BisectResult<BisectOutcome> {
    let progress = ProbeProgress::new(ctx, range.len());
    let bisector = Bisector::new(manager, evaluator, testcase, options).on_probe(Box::new(
        |record: &ProbeRecord, remaining: usize| {
            progress.on_probe(&record.build.prefix(), remaining);
            if !ctx.use_fancy_output() {
                ui::step_verdict(ctx, &record.build.prefix(), record.verdict, remaining);
            } else {
                progress.println(format!(
                    "  [{}] {} ({} left)",
                    record.verdict,
                    record.build.prefix(),
                    remaining
                ));
            }
        },
    ));

    let result = tokio::select! {
        result = bisector.run(range) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, releasing builds");
            Err(BisectError::Interrupted)
        }
    };
    progress.finish();
    result
}

fn report(ctx: &UiContext, outcome: &BisectOutcome) {
    let (culprit_label, baseline_label) = match outcome.direction {
        Direction::Regression => ("first bad", "last good"),
        Direction::Fix => ("first good", "last bad"),
    };

    ui::key_value(ctx, culprit_label, &outcome.culprit.to_string());
    match &outcome.last_baseline {
        Some(build) => ui::key_value(ctx, baseline_label, &build.to_string()),
        None => ui::step_warn_hint(
            ctx,
            &format!("{} is the first build of the range", outcome.culprit),
            "Move --start earlier to confirm it",
        ),
    }
    ui::key_value(
        ctx,
        "probes",
        &format!(
            "{} ({} skipped)",
            outcome.probes.len(),
            outcome.skipped.len()
        ),
    );
    if let Some(probe) = outcome
        .probes
        .iter()
        .rev()
        .find(|p| p.verdict != Verdict::Skip && p.build == outcome.culprit)
    {
        if let Some(first_line) = probe.diagnostics.lines().next() {
            ui::key_value(ctx, "outcome", first_line);
        }
    }
    ui::key_value(ctx, "elapsed", &format_elapsed(outcome.elapsed));

    if outcome.is_ambiguous() {
        ui::step_warn_hint(
            ctx,
            &format!("{} is one of: {}", culprit_label, suspects(outcome)),
            "Skipped builds in between could not be evaluated",
        );
        ui::outro_warn(
            ctx,
            &format!(
                "{} not pinned down ({} candidates)",
                culprit_label,
                outcome.unresolved.len() + 1
            ),
        );
        return;
    }

    ui::outro_success(
        ctx,
        &format!("{}: {}", culprit_label, outcome.culprit.id()),
    );
}

/// Builds that may hold the culprit, oldest first
fn suspects(outcome: &BisectOutcome) -> String {
    outcome
        .unresolved
        .iter()
        .chain(std::iter::once(&outcome.culprit))
        .map(|build| build.id().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Build the range from the boundaries, defaulting to the last year of
/// nightlies (or the whole revision list when one is given)
pub async fn resolve_range(args: &BisectArgs, today: NaiveDate) -> BisectResult<BuildRange> {
    let branch = args.branch();
    let flags: BuildFlags = args.build.into();

    if let Some(path) = &args.revisions {
        let revisions = read_revisions(path).await?;
        return revision_range(
            revisions,
            args.start.as_deref(),
            args.end.as_deref(),
            branch,
            flags,
        );
    }

    let start = match &args.start {
        Some(s) => s.parse()?,
        None => BuildId::Date(today - Duration::days(DEFAULT_SPAN_DAYS)),
    };
    let end = match &args.end {
        Some(s) => s.parse()?,
        None => BuildId::Date(today),
    };

    match (start, end) {
        (BuildId::Date(start), BuildId::Date(end)) => {
            if end < start {
                return Err(BisectError::InvalidBoundary {
                    value: end.to_string(),
                    reason: format!("end is before start {}", start),
                });
            }
            BuildRange::from_dates(start, end, branch, flags)
        }
        (start, end) => {
            let value = if start.is_date() { end } else { start };
            Err(BisectError::InvalidBoundary {
                value: value.to_string(),
                reason: "revision boundaries need --revisions".to_string(),
            })
        }
    }
}

async fn read_revisions(path: &Path) -> BisectResult<Vec<BuildId>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BisectError::io(format!("reading revisions from {}", path.display()), e))?;

    let revisions = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect::<BisectResult<Vec<BuildId>>>()?;
    debug!("Read {} revisions from {}", revisions.len(), path.display());
    Ok(revisions)
}

/// Slice an ordered revision list between two boundaries (inclusive)
fn revision_range(
    revisions: Vec<BuildId>,
    start: Option<&str>,
    end: Option<&str>,
    branch: Branch,
    flags: BuildFlags,
) -> BisectResult<BuildRange> {
    let all = BuildRange::from_ids(revisions, branch, flags)?;

    let locate = |boundary: Option<&str>, default: usize| -> BisectResult<usize> {
        match boundary {
            None => Ok(default),
            Some(s) => {
                let id: BuildId = s.parse()?;
                if id.is_date() {
                    return Err(BisectError::InvalidBoundary {
                        value: s.to_string(),
                        reason: "expected a revision when --revisions is given".to_string(),
                    });
                }
                all.locate(&BuildDescriptor::new(id, branch, flags))
            }
        }
    };

    let lo = locate(start, 0)?;
    let hi = locate(end, all.len() - 1)?;
    if hi < lo {
        return Err(BisectError::InvalidBoundary {
            value: end.unwrap_or_default().to_string(),
            reason: "end revision comes before start revision".to_string(),
        });
    }
    all.slice(lo, hi + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use clap::Parser;
    use tempfile::TempDir;

    const REV_A: &str = "aaaaaaaaaaaa";
    const REV_B: &str = "bbbbbbbbbbbb";
    const REV_C: &str = "cccccccccccc";
    const REV_D: &str = "dddddddddddd";

    fn args(extra: &[&str]) -> BisectArgs {
        let mut argv = vec!["autobisect", "bisect", "t.js"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Bisect(args) => args,
            _ => unreachable!(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    #[tokio::test]
    async fn default_range_is_last_year() {
        let range = resolve_range(&args(&[]), today()).await.unwrap();
        assert_eq!(range.len(), 365);
        assert_eq!(range.first().id().to_string(), "2023-07-02");
        assert_eq!(range.last().id().to_string(), "2024-06-30");
    }

    #[tokio::test]
    async fn explicit_dates_and_flags() {
        let range = resolve_range(
            &args(&["--start", "2023-01-01", "--end", "2023-01-10", "--asan", "--esr"]),
            today(),
        )
        .await
        .unwrap();
        assert_eq!(range.len(), 10);
        assert_eq!(range.first().prefix(), "esr-2023-01-01-opt-asan");
    }

    #[tokio::test]
    async fn malformed_boundary_rejected() {
        let err = resolve_range(&args(&["--start", "2023-13-01"]), today())
            .await
            .unwrap_err();
        assert!(matches!(err, BisectError::InvalidBoundary { .. }));
    }

    #[tokio::test]
    async fn reversed_dates_rejected() {
        let err = resolve_range(
            &args(&["--start", "2023-02-01", "--end", "2023-01-01"]),
            today(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BisectError::InvalidBoundary { .. }));
    }

    #[tokio::test]
    async fn revisions_need_a_list() {
        let err = resolve_range(&args(&["--start", REV_A, "--end", REV_B]), today())
            .await
            .unwrap_err();
        assert!(matches!(err, BisectError::InvalidBoundary { ref reason, .. } if reason.contains("--revisions")));
    }

    #[tokio::test]
    async fn revision_list_is_sliced() {
        let temp = TempDir::new().unwrap();
        let list = temp.path().join("revs.txt");
        std::fs::write(
            &list,
            format!("# oldest first\n{REV_A}\n{REV_B}\n\n{REV_C}\n{REV_D}\n"),
        )
        .unwrap();
        let list = list.to_str().unwrap();

        let range = resolve_range(
            &args(&["--revisions", list, "--start", REV_B, "--end", REV_D]),
            today(),
        )
        .await
        .unwrap();
        let ids: Vec<String> = range.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec![REV_B, REV_C, REV_D]);

        let whole = resolve_range(&args(&["--revisions", list]), today())
            .await
            .unwrap();
        assert_eq!(whole.len(), 4);

        let err = resolve_range(
            &args(&["--revisions", list, "--start", "eeeeeeeeeeee"]),
            today(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BisectError::NotFound(_)));

        let err = resolve_range(
            &args(&["--revisions", list, "--start", REV_C, "--end", REV_A]),
            today(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BisectError::InvalidBoundary { .. }));
    }

    #[tokio::test]
    async fn suspects_list_skipped_builds_then_culprit() {
        let range = resolve_range(
            &args(&["--start", "2023-01-05", "--end", "2023-01-08"]),
            today(),
        )
        .await
        .unwrap();
        let builds: Vec<BuildDescriptor> = range.iter().cloned().collect();
        let outcome = BisectOutcome {
            direction: Direction::Regression,
            culprit: builds[3].clone(),
            last_baseline: Some(builds[0].clone()),
            unresolved: vec![builds[1].clone(), builds[2].clone()],
            verification: Vec::new(),
            probes: Vec::new(),
            skipped: vec![builds[1].clone(), builds[2].clone()],
            elapsed: std::time::Duration::ZERO,
        };

        assert!(outcome.is_ambiguous());
        assert_eq!(suspects(&outcome), "2023-01-06, 2023-01-07, 2023-01-08");
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(
            format_elapsed(std::time::Duration::from_secs(3725)),
            "1h 02m 05s"
        );
    }
}
