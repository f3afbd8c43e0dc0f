//! CLI argument definitions using clap derive

use crate::build::{Branch, BuildFlags};
use crate::evaluate::Level;
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// autobisect - find the build that introduced (or fixed) a crash
///
/// Binary-searches a range of nightly or per-revision builds, keeping
/// downloaded builds in a size-capped local cache.
#[derive(Parser, Debug)]
#[command(name = "autobisect")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "AUTOBISECT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format (overrides general.log-format)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bisect a testcase over a range of builds
    Bisect(BisectArgs),

    /// Inspect or trim the build cache
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the bisect command
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("branch").args(["central", "inbound", "release", "beta", "esr"])))]
pub struct BisectArgs {
    /// Testcase to evaluate
    pub testcase: PathBuf,

    /// First build: YYYY-MM-DD or a revision (default: one year ago)
    #[arg(short, long)]
    pub start: Option<String>,

    /// Last build: YYYY-MM-DD or a revision (default: today)
    #[arg(short, long)]
    pub end: Option<String>,

    /// Ordered revision list, one per line, required for revision boundaries
    #[arg(long)]
    pub revisions: Option<PathBuf>,

    /// Evaluations per probe (overrides bisect.count)
    #[arg(long)]
    pub count: Option<u32>,

    /// Search for the build that fixed the testcase
    #[arg(long)]
    pub find_fix: bool,

    /// Evaluate both boundaries before bisecting
    #[arg(long)]
    pub verify: bool,

    /// Minimum level that counts as reproducing (overrides evaluator.min-level)
    #[arg(long)]
    pub min_level: Option<Level>,

    /// Use mozilla-central builds (default)
    #[arg(long)]
    pub central: bool,

    /// Use mozilla-inbound builds
    #[arg(long)]
    pub inbound: bool,

    /// Use mozilla-release builds
    #[arg(long)]
    pub release: bool,

    /// Use mozilla-beta builds
    #[arg(long)]
    pub beta: bool,

    /// Use mozilla-esr builds
    #[arg(long)]
    pub esr: bool,

    #[command(flatten)]
    pub build: BuildFlagArgs,
}

impl BisectArgs {
    /// Selected branch; the arg group keeps these mutually exclusive
    pub fn branch(&self) -> Branch {
        if self.inbound {
            Branch::Inbound
        } else if self.release {
            Branch::Release
        } else if self.beta {
            Branch::Beta
        } else if self.esr {
            Branch::Esr
        } else {
            Branch::Central
        }
    }
}

/// Build-type flags
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct BuildFlagArgs {
    /// Debug builds
    #[arg(long)]
    pub debug: bool,

    /// AddressSanitizer builds
    #[arg(long)]
    pub asan: bool,

    /// Fuzzing-enabled builds
    #[arg(long)]
    pub fuzzing: bool,

    /// Coverage builds
    #[arg(long)]
    pub coverage: bool,

    /// 32-bit builds
    #[arg(long = "32")]
    pub arch_32: bool,
}

impl From<BuildFlagArgs> for BuildFlags {
    fn from(args: BuildFlagArgs) -> Self {
        Self {
            debug: args.debug,
            asan: args.asan,
            fuzzing: args.fuzzing,
            coverage: args.coverage,
            arch_32: args.arch_32,
        }
    }
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., storage.persist-limit)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached builds, least recently used first
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Evict least recently used builds until the cache fits its quota
    Evict,

    /// Remove every cached build not currently in use
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
