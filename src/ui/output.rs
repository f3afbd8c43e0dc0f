//! Output functions for consistent CLI formatting

use super::context::UiContext;
use crate::bisect::Verdict;
use console::{style, StyledObject};

/// Display intro banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
        println!();
    }
}

/// Display success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).green().bold()).ok();
    } else {
        println!();
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Display warning outro
pub fn outro_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).yellow().bold()).ok();
    } else {
        println!();
        println!("{} {}", style("[WARN]").yellow(), message);
    }
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(message).ok();
    } else {
        println!("  {} {}", style("[OK]").green(), message);
    }
}

/// Display a warning step with hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(format!("{} - {}", message, style(hint).dim())).ok();
    } else {
        println!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
    }
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::info(message).ok();
    } else {
        println!("  {} {}", style("[INFO]").cyan(), message);
    }
}

/// One probe result: `[BAD] central-2023-01-07-opt (3 left)`
pub fn step_verdict(ctx: &UiContext, build: &str, verdict: Verdict, remaining: usize) {
    let label = verdict_label(verdict);
    if ctx.use_fancy_output() {
        cliclack::log::step(format!(
            "{} {} {}",
            label,
            build,
            style(format!("({} left)", remaining)).dim()
        ))
        .ok();
    } else {
        println!("  {} {} ({} left)", label, build, remaining);
    }
}

fn verdict_label(verdict: Verdict) -> StyledObject<String> {
    let text = format!("[{}]", verdict);
    match verdict {
        Verdict::Good => style(text).green(),
        Verdict::Bad => style(text).red(),
        Verdict::Skip => style(text).yellow(),
    }
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        // These should not panic
        intro(&ctx, "Bisecting");
        step_verdict(&ctx, "central-2023-01-07-opt", Verdict::Bad, 2);
        key_value(&ctx, "culprit", "central-2023-01-07-opt");
        outro_success(&ctx, "Done");
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(
            console::strip_ansi_codes(&verdict_label(Verdict::Skip).to_string()),
            "[SKIP]"
        );
    }
}
