//! `tandem deploy`: one environment, or every environment with `--all`.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::ConfigStore;
use crate::application::services::deploy_run::{self, RunOptions};
use crate::application::services::port_allocator::UniformCandidates;
use crate::domain::DeployConfig;
use crate::domain::config::MAX_HEALTH_TIMEOUT_SECS;
use crate::infra::clock::SystemClock;

/// Arguments for the deploy command.
#[derive(Args)]
pub struct DeployArgs {
    /// Environment to deploy
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub environment: Option<String>,

    /// Deploy every configured environment, one after another
    #[arg(long)]
    pub all: bool,

    /// Leave a failed deployment in place instead of rolling back
    #[arg(long)]
    pub no_rollback: bool,

    /// Stop health polling after this many seconds even if retries remain
    #[arg(
        long,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..=MAX_HEALTH_TIMEOUT_SECS)
    )]
    pub health_timeout: Option<u64>,
}

/// Run the deploy command.
///
/// # Errors
///
/// Returns an error when the run cannot start (configuration, unknown
/// environment, SSH setup). Per-environment failures are rendered in the
/// report and turn into exit code 1.
pub async fn run(app: &AppContext, args: &DeployArgs) -> Result<ExitCode> {
    let store = app.config_store();
    let config = store.load()?;
    let names = target_environments(&config, args)?;

    let gateway = app.gateway(&config)?;
    let reporter = app.reporter();
    let opts = RunOptions {
        auto_rollback: config.auto_rollback && !args.no_rollback,
        registry_password: registry_password(&config),
        health_deadline: args.health_timeout.map(Duration::from_secs),
        lock_owner: lock_owner(),
    };

    let outcome = deploy_run::deploy_environments(
        &gateway,
        &SystemClock,
        &reporter,
        &mut UniformCandidates,
        &config,
        &names,
        &opts,
    )
    .await;
    reporter.clear();
    let rendered = app.renderer().render_report(&outcome.report);

    for reclaim in outcome.reclaims {
        let environment = reclaim.environment().to_string();
        match reclaim.finish().await {
            Ok(report) => {
                for (instance, output) in &report.failed {
                    app.output.warn(&format!(
                        "{environment}: old instance {instance} was not removed: {output}"
                    ));
                }
            }
            Err(err) => app
                .output
                .warn(&format!("{environment}: reclaiming old instances failed: {err:#}")),
        }
    }
    gateway.close().await;
    rendered?;

    if outcome.report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn target_environments(config: &DeployConfig, args: &DeployArgs) -> Result<Vec<String>> {
    if args.all {
        return Ok(config.environment_names());
    }
    let Some(name) = &args.environment else {
        bail!("name an environment or pass --all");
    };
    config.environment(name)?;
    Ok(vec![name.clone()])
}

/// Password for the configured registry, read from the local environment.
fn registry_password(config: &DeployConfig) -> Option<String> {
    let var = config.registry.password_env.as_deref()?;
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            tracing::debug!(variable = %var, "registry password variable is unset");
            None
        }
    }
}

/// `user@host:pid`, written into environment locks.
fn lock_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}:{}", std::process::id())
}
