//! Application service: one orchestration run over one or more environments.
//!
//! Each environment is deployed under its own lock, one after another, and
//! summarised in a [`RunReport`]. A failed environment does not stop the
//! rest of the run.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::application::ports::{Clock, ProgressReporter, RemoteExecutor};
use crate::application::services::container_deploy::{
    self, ContainerDeployed, ContainerTarget, DeployOptions,
};
use crate::application::services::env_lock;
use crate::application::services::port_allocator::CandidateSource;
use crate::application::services::reclaim::ReclaimHandle;
use crate::application::services::static_deploy::{self, StaticDeployed, StaticTarget};
use crate::domain::error::ConfigError;
use crate::domain::{DeployConfig, DeployError, DeployKind};

/// Switches shared by every environment of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub auto_rollback: bool,
    pub registry_password: Option<String>,
    pub health_deadline: Option<Duration>,
    /// Written into the environment lock so other operators can see who holds it.
    pub lock_owner: String,
}

/// Outcome of one environment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvironmentReport {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeployKind>,
    pub ok: bool,
    /// New container name, or new release name for static sites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_verified: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reclaiming: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rollback did not leave the proxy in a valid state.
    pub critical: bool,
}

impl EnvironmentReport {
    fn failed(environment: &str, kind: Option<DeployKind>, err: &anyhow::Error) -> Self {
        let critical = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<DeployError>(),
                Some(DeployError::CriticalRollbackFailure { .. })
            )
        });
        Self {
            environment: environment.to_string(),
            kind,
            ok: false,
            error: Some(format!("{err:#}")),
            critical,
            ..Self::default()
        }
    }

    fn from_container(environment: &str, deployed: &ContainerDeployed) -> Self {
        Self {
            environment: environment.to_string(),
            kind: Some(DeployKind::Docker),
            ok: true,
            instance: Some(deployed.instance.clone()),
            port: Some(deployed.port),
            previous_port: deployed.previous_port,
            health_verified: Some(deployed.health_verified),
            reclaiming: deployed.replaced.clone(),
            warnings: deployed.warnings.clone(),
            ..Self::default()
        }
    }

    fn from_static(environment: &str, deployed: StaticDeployed) -> Self {
        Self {
            environment: environment.to_string(),
            kind: Some(DeployKind::Static),
            ok: true,
            instance: Some(deployed.release),
            previous_release: deployed.previous,
            pruned: deployed.pruned,
            warnings: deployed.warnings,
            ..Self::default()
        }
    }
}

/// Structured summary of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub environments: Vec<EnvironmentReport>,
}

impl RunReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.environments.iter().all(|e| e.ok)
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&EnvironmentReport> {
        self.environments.iter().filter(|e| !e.ok).collect()
    }
}

/// Report plus the background reclamations the run started.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub reclaims: Vec<ReclaimHandle>,
}

/// Deploy `environments` in order.
pub async fn deploy_environments(
    remote: &impl RemoteExecutor,
    clock: &impl Clock,
    reporter: &impl ProgressReporter,
    candidates: &mut impl CandidateSource,
    config: &DeployConfig,
    environments: &[String],
    opts: &RunOptions,
) -> RunOutcome {
    let mut outcome = RunOutcome {
        report: RunReport::default(),
        reclaims: Vec::new(),
    };
    for name in environments {
        let (report, reclaim) =
            deploy_environment(remote, clock, reporter, candidates, config, name, opts).await;
        if let Some(err) = &report.error {
            tracing::error!(environment = %name, error = %err, "deployment failed");
        }
        outcome.report.environments.push(report);
        outcome.reclaims.extend(reclaim);
    }
    outcome
}

/// Deploy one environment under its lock. Never returns `Err`: failures are
/// captured in the report.
pub async fn deploy_environment(
    remote: &impl RemoteExecutor,
    clock: &impl Clock,
    reporter: &impl ProgressReporter,
    candidates: &mut impl CandidateSource,
    config: &DeployConfig,
    name: &str,
    opts: &RunOptions,
) -> (EnvironmentReport, Option<ReclaimHandle>) {
    let env = match config.environment(name) {
        Ok(env) => env,
        Err(err) => return (EnvironmentReport::failed(name, None, &err), None),
    };
    let kind = Some(env.kind);

    let lock = match env_lock::acquire(
        remote,
        reporter,
        &config.proxy,
        &config.product,
        name,
        &opts.lock_owner,
    )
    .await
    {
        Ok(lock) => lock,
        Err(err) => return (EnvironmentReport::failed(name, kind, &err), None),
    };

    let result = dispatch(remote, clock, reporter, candidates, config, name, opts).await;
    env_lock::release(remote, lock).await;

    match result {
        Ok(Deployed::Container(mut deployed)) => {
            let reclaim = deployed.reclaim.take();
            (EnvironmentReport::from_container(name, &deployed), reclaim)
        }
        Ok(Deployed::Static(deployed)) => (EnvironmentReport::from_static(name, deployed), None),
        Err(err) => (EnvironmentReport::failed(name, kind, &err), None),
    }
}

enum Deployed {
    Container(ContainerDeployed),
    Static(StaticDeployed),
}

async fn dispatch(
    remote: &impl RemoteExecutor,
    clock: &impl Clock,
    reporter: &impl ProgressReporter,
    candidates: &mut impl CandidateSource,
    config: &DeployConfig,
    name: &str,
    opts: &RunOptions,
) -> Result<Deployed> {
    let env = config.environment(name)?;
    match env.kind {
        DeployKind::Docker => {
            let docker = env.docker.as_ref().ok_or_else(|| missing_section(name, "docker"))?;
            let target = ContainerTarget {
                config,
                environment: name,
                env,
                docker,
            };
            let deploy_opts = DeployOptions {
                auto_rollback: opts.auto_rollback,
                registry_password: opts.registry_password.clone(),
                health_deadline: opts.health_deadline,
            };
            container_deploy::deploy_container(remote, clock, reporter, candidates, &target, &deploy_opts)
                .await
                .map(Deployed::Container)
        }
        DeployKind::Static => {
            let site = env.static_site.as_ref().ok_or_else(|| missing_section(name, "static"))?;
            let target = StaticTarget {
                config,
                environment: name,
                env,
                site,
            };
            static_deploy::deploy_static(remote, clock, reporter, &target)
                .await
                .map(Deployed::Static)
        }
    }
}

fn missing_section(environment: &str, section: &str) -> anyhow::Error {
    ConfigError::Invalid {
        field: format!("environments.{environment}.{section}"),
        reason: format!("required when kind is {section}"),
    }
    .into()
}
