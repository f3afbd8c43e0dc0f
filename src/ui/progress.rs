//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress bar over the probes of one bisection.
///
/// The length is the worst-case probe count for the range and shrinks as the
/// window narrows faster than that.
pub struct ProbeProgress {
    bar: Option<ProgressBar>,
}

impl ProbeProgress {
    pub fn new(ctx: &UiContext, builds: usize) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(max_probes(builds));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.cyan} Bisecting  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar }
    }

    /// Record a finished probe; `remaining` is the candidate count left
    pub fn on_probe(&self, build: &str, remaining: usize) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
            bar.set_length(bar.position() + max_probes(remaining + 1));
            bar.set_message(build.to_string());
        }
    }

    /// Print a line above the bar without tearing it
    pub fn println(&self, line: String) {
        match self.bar {
            Some(ref bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// Worst-case probes to bisect `builds` builds: ceil(log2(builds))
pub fn max_probes(builds: usize) -> u64 {
    if builds <= 1 {
        0
    } else {
        u64::from(usize::BITS - (builds - 1).leading_zeros())
    }
}
