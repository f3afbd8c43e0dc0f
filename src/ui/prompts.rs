//! Interactive prompts with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{BisectError, BisectResult};

/// Prompt for confirmation; auto-yes answers yes, non-interactive answers
/// `default`
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> BisectResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }

    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| BisectError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| BisectError::io("reading confirmation", e))
}
