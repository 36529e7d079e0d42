//! `TerminalReporter`: Presentation-layer implementation of `ProgressReporter`.
//!
//! Wraps `&OutputContext` and implements the `application::ports::ProgressReporter`
//! trait so application services can emit progress events without depending on
//! any presentation type directly.

use std::sync::{Mutex, PoisonError};

use indicatif::ProgressBar;
use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::{OutputContext, progress};

/// Terminal progress reporter that wraps an `OutputContext`.
///
/// On a TTY each `step()` drives a single spinner that the next `success()`
/// or `warn()` settles; otherwise steps print as `"  → {message}"` lines.
/// Everything is suppressed when `ctx.quiet`.
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
    spinner: Mutex<Option<ProgressBar>>,
}

impl<'a> TerminalReporter<'a> {
    /// Create a new `TerminalReporter` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            spinner: Mutex::new(None),
        }
    }

    /// Clear a pending spinner, e.g. before printing an error.
    pub fn clear(&self) {
        if let Some(pb) = self.take_spinner() {
            pb.finish_and_clear();
        }
    }

    fn take_spinner(&self) -> Option<ProgressBar> {
        self.spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        if self.ctx.quiet {
            return;
        }
        if self.ctx.show_progress() {
            let mut slot = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pb) => pb.set_message(message.to_string()),
                None => *slot = Some(progress::spinner(message)),
            }
        } else {
            println!("  {} {message}", "→".style(self.ctx.styles.step));
        }
    }

    fn success(&self, message: &str) {
        if self.ctx.quiet {
            return;
        }
        let mark = format!("{}", "✓".style(self.ctx.styles.done));
        match self.take_spinner() {
            Some(pb) => progress::finish_with(&pb, &mark, message),
            None => println!("  {mark} {message}"),
        }
    }

    fn warn(&self, message: &str) {
        if self.ctx.quiet {
            return;
        }
        let mark = format!("{}", "!".style(self.ctx.styles.warning));
        match self.spinner.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(pb) => pb.println(format!("  {mark} {message}")),
            None => println!("  {mark} {message}"),
        }
    }
}
