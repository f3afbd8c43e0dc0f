//! autobisect - crash regression bisection over cached builds
//!
//! CLI entry point that dispatches to subcommands.

use autobisect::cli::args::LogFormat;
use autobisect::cli::{Cli, Commands};
use autobisect::config::ConfigManager;
use autobisect::error::BisectResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{} {}",
                style(format!("Error ({}):", e.stage())).red().bold(),
                e
            );
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BisectResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::default(),
    };
    let config = config_manager.load().await;

    // Logging starts before a config error is returned
    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config
            .as_ref()
            .map(|c| c.general.log_format == "json")
            .unwrap_or(false),
    };
    init_logging(cli.verbose, json);

    let config = config?;
    debug!("Using config at {}", config_manager.path().display());

    match cli.command {
        Commands::Bisect(args) => autobisect::cli::commands::bisect(args, &config).await,
        Commands::Cache(args) => autobisect::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            autobisect::cli::commands::config(args, &config_manager, &config).await
        }
    }
}

/// 0 = warn (progress output only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("autobisect=warn"),
        1 => EnvFilter::new("autobisect=info"),
        _ => EnvFilter::new("autobisect=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
