//! Human-readable terminal renderer.

use owo_colors::OwoColorize as _;

use crate::application::services::deploy_run::{EnvironmentReport, RunReport};
use crate::domain::{DeployConfig, DeployKind};
use crate::output::OutputContext;

/// Renders run results and configuration as terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    /// Render the CLI version information.
    pub fn render_version(&self, version: &str) {
        if self.ctx.quiet {
            return;
        }
        println!("tandem {version}");
    }

    /// Render the per-environment summary. Failures are always shown.
    pub fn render_report(&self, report: &RunReport) {
        if report.environments.len() > 1 && !self.ctx.quiet {
            println!();
            self.ctx.header("Summary:");
        }
        for env in &report.environments {
            if env.ok {
                self.render_success(env);
            } else {
                self.render_failure(env);
            }
        }
    }

    fn render_success(&self, env: &EnvironmentReport) {
        let instance = env.instance.as_deref().unwrap_or("-");
        match (env.kind, env.port) {
            (Some(DeployKind::Docker), Some(port)) => self
                .ctx
                .success(&format!("{}: {instance} live on port {port}", env.environment)),
            _ => self
                .ctx
                .success(&format!("{}: release {instance} live", env.environment)),
        }
        if let Some(previous) = env.previous_port {
            self.ctx.kv("    replaced port:", &previous.to_string());
        }
        if let Some(previous) = &env.previous_release {
            self.ctx.kv("    previous release:", previous);
        }
        if !env.reclaiming.is_empty() {
            self.ctx.kv("    reclaiming:", &env.reclaiming.join(", "));
        }
        if !env.pruned.is_empty() {
            self.ctx.kv("    pruned:", &env.pruned.join(", "));
        }
        for warning in &env.warnings {
            self.ctx.warn(warning);
        }
    }

    fn render_failure(&self, env: &EnvironmentReport) {
        let message = env.error.as_deref().unwrap_or("unknown error");
        if env.critical {
            eprintln!(
                "  {} {}: {message}",
                "✗✗".style(self.ctx.styles.critical),
                env.environment
            );
        } else {
            self.ctx.error(&format!("{}: {message}", env.environment));
        }
    }

    /// Render a validated configuration summary.
    pub fn render_config(&self, config: &DeployConfig, path: &str) {
        if self.ctx.quiet {
            return;
        }
        self.ctx.success(&format!("{path} is valid"));
        self.ctx.kv("product:", &config.product);
        self.ctx.kv("system host:", &config.hosts.system.destination());
        self.ctx.kv("application host:", &config.hosts.application.destination());
        self.ctx.kv(
            "ports:",
            &format!("{}-{}", config.ports.start, config.ports.end),
        );
        for (name, env) in &config.environments {
            let kind = match env.kind {
                DeployKind::Docker => "docker",
                DeployKind::Static => "static",
            };
            self.ctx.kv(&format!("{name}:"), &format!("{kind} → {}", env.domain));
        }
    }
}
