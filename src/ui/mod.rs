//! Terminal output: interactive (cliclack/indicatif) or plain for CI
//!
//! # Example
//!
//! ```rust,ignore
//! use autobisect::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "autobisect");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Opening build cache...");
//! spinner.stop("Cache ready");
//!
//! ui::step_verdict(&ctx, "central-2023-01-07-opt", Verdict::Bad, 1);
//! ui::outro_success(&ctx, "Culprit: central-2023-01-07-opt");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, step_info, step_ok, step_verdict, step_warn_hint,
};
pub use progress::{max_probes, ProbeProgress, TaskSpinner};
pub use prompts::confirm;
