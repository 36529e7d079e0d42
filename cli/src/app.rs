//! Application context: unified state passed to every command handler.
//!
//! Adding a new cross-cutting concern (e.g. a new global flag) requires only
//! one field change here; no command signature changes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::domain::DeployConfig;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::gateway::Gateway;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer, TerminalReporter};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub output: OutputFlags,
    /// `--config`, when given.
    pub config: Option<PathBuf>,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Explicit config path from the command line.
    pub config_path: Option<PathBuf>,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// JSON mode silences progress output so stdout carries only the document.
    #[must_use]
    pub fn new(flags: &AppFlags) -> Self {
        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        let quiet = flags.output.quiet || mode == OutputMode::Json;

        Self {
            output: OutputContext::new(flags.output.no_color, quiet),
            mode,
            config_path: flags.config.clone(),
        }
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Progress reporter bound to this context's output settings.
    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        TerminalReporter::new(&self.output)
    }

    /// Config store honouring `--config`, then `TANDEM_CONFIG`, then `./tandem.yaml`.
    #[must_use]
    pub fn config_store(&self) -> YamlConfigStore {
        YamlConfigStore::resolve(self.config_path.as_deref())
    }

    /// SSH gateway to both hosts of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the control-socket directory cannot be created.
    pub fn gateway(&self, config: &DeployConfig) -> Result<Gateway<TokioCommandRunner>> {
        let runner = TokioCommandRunner::new(Duration::from_secs(config.ssh.command_timeout_secs));
        Gateway::new(runner, config.hosts.clone(), &config.ssh)
    }
}
