//! Application service: container cutover.
//!
//! `Detecting → Allocating → Starting → HealthPolling → PublishingConfig →
//! CuttingOver → ReclaimingOld`, with rollback from health polling and
//! publishing. Until the proxy reload in `PublishingConfig` succeeds the old
//! instance is the only one receiving traffic.
//!
//! Imports only from `crate::domain` and `crate::application`.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use crate::application::handles::wait_all;
use crate::application::ports::{Clock, ProgressReporter, RemoteExecutor};
use crate::application::services::port_allocator::{self, CandidateSource};
use crate::application::services::proxy_publish::{
    self, Documents, ProxyFiles, PublishFailure, Snapshot, Staging,
};
use crate::application::services::reclaim::{self, ReclaimHandle};
use crate::application::services::remote::{first_failure, run_one, step_failed};
use crate::domain::config::DockerConfig;
use crate::domain::docker::{self, ContainerInfo, HealthStatus, RunSpec};
use crate::domain::naming::{backend_name, instance_name, instance_prefix};
use crate::domain::proxy::{self, ContainerSite};
use crate::domain::shell;
use crate::domain::{BatchJob, DeployConfig, DeployError, EnvironmentConfig, HostRole};

const APP: HostRole = HostRole::Application;
/// Added to `interval * retries` when no deadline is given.
const HEALTH_GRACE: Duration = Duration::from_secs(30);
/// Stand-in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// One docker environment, resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ContainerTarget<'a> {
    pub config: &'a DeployConfig,
    pub environment: &'a str,
    pub env: &'a EnvironmentConfig,
    pub docker: &'a DockerConfig,
}

impl ContainerTarget<'_> {
    /// Deploy directory on the application host (env file, required files).
    #[must_use]
    pub fn deploy_dir(&self) -> String {
        format!(
            "{}/{}",
            self.config.deploy_root.trim_end_matches('/'),
            self.environment
        )
    }
}

/// Run-level switches.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Remove an unhealthy new instance instead of leaving it for inspection.
    pub auto_rollback: bool,
    /// Registry secret, resolved by the caller from `registry.password_env`.
    pub registry_password: Option<String>,
    /// Hard stop for health polling; defaults to the retry budget plus 30s.
    pub health_deadline: Option<Duration>,
}

/// A completed container cutover.
#[derive(Debug)]
pub struct ContainerDeployed {
    pub instance: String,
    pub port: u16,
    pub previous_port: Option<u16>,
    /// `false` when the image has no health check and readiness was assumed.
    pub health_verified: bool,
    /// Instances handed to background reclamation.
    pub replaced: Vec<String>,
    pub warnings: Vec<String>,
    pub reclaim: Option<ReclaimHandle>,
}

/// Current state observed on both hosts before anything changes.
#[derive(Debug, Clone)]
pub struct Detected {
    pub snapshot: Snapshot,
    pub previous_port: Option<u16>,
    pub instances: Vec<ContainerInfo>,
}

/// Result of health polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// The image defines no health check.
    Unverified,
    TimedOut { attempts: u32, last: HealthStatus },
}

/// Deploy a new container version with zero downtime.
///
/// # Errors
///
/// Any failure is fatal to the run. Errors after the new instance started
/// are returned only after rollback, and say what was rolled back.
pub async fn deploy_container(
    remote: &impl RemoteExecutor,
    clock: &impl Clock,
    reporter: &impl ProgressReporter,
    candidates: &mut impl CandidateSource,
    target: &ContainerTarget<'_>,
    opts: &DeployOptions,
) -> Result<ContainerDeployed> {
    let config = target.config;
    let env_name = target.environment;
    let docker = target.docker;
    let files = ProxyFiles::container(&config.proxy, &config.product, env_name);

    reporter.step(&format!("{env_name}: detecting current deployment..."));
    let detected = detect(remote, target, &files).await?;
    match detected.previous_port {
        Some(port) => tracing::info!(environment = %env_name, port, "live instance detected"),
        None => tracing::info!(environment = %env_name, "first deployment"),
    }

    let now = clock.now();
    let instance = instance_name(&config.product, env_name, now);
    let staging = Staging::new(&config.product, env_name, now);
    let exclude: Vec<u16> = detected.previous_port.into_iter().collect();
    let port = port_allocator::pick(remote, config.ports, &exclude, candidates).await?;

    reporter.step(&format!("{env_name}: starting {instance}..."));
    prepare_image(remote, target, opts).await?;
    let port = start_instance(remote, reporter, candidates, target, &instance, port, &exclude).await?;

    reporter.step(&format!("{env_name}: waiting for {instance} to become healthy..."));
    let interval = Duration::from_secs(docker.health_interval_secs);
    let deadline = health_deadline(docker, opts, interval);
    let verdict = poll_health(remote, &instance, docker.health_retries, interval, deadline).await?;
    let mut warnings = Vec::new();
    match &verdict {
        HealthVerdict::Healthy => {}
        HealthVerdict::Unverified => {
            let msg = format!("{instance} has no health check; readiness was not verified");
            reporter.warn(&msg);
            warnings.push(msg);
        }
        HealthVerdict::TimedOut { attempts, last } => {
            let remediation = if opts.auto_rollback {
                remove_instance(remote, &instance).await;
                proxy_publish::verify(remote, &config.proxy, &files).await?;
                format!(
                    "Rolled back: {instance} was removed; {} keeps serving traffic.",
                    describe_previous(&detected)
                )
            } else {
                format!(
                    "Auto-rollback is off: {instance} is left running but receives no traffic.\n\
                     Inspect with: docker logs {instance}; remove with: docker rm -f {instance}"
                )
            };
            return Err(DeployError::HealthCheckTimeout {
                instance,
                attempts: *attempts,
                last_status: last.describe(),
                remediation,
            }
            .into());
        }
    }

    reporter.step(&format!("{env_name}: publishing proxy configuration..."));
    let docs = render_documents(target, &instance, port);
    if let Err(failure) = proxy_publish::publish(remote, &config.proxy, &files, &docs, &staging).await {
        return Err(roll_back_publish(remote, target, &files, &detected, &staging, &instance, failure).await);
    }
    reporter.success(&format!("{env_name}: traffic switched to {instance} on port {port}"));

    let replaced: Vec<String> = detected
        .instances
        .iter()
        .map(|c| c.name.clone())
        .filter(|name| *name != instance)
        .collect();
    warnings.extend(cut_over(remote, docker, &instance, &replaced).await);
    let reclaim = reclaim::start(remote, env_name, replaced.clone(), docker.stop_grace_secs);

    Ok(ContainerDeployed {
        instance,
        port,
        previous_port: detected.previous_port,
        health_verified: verdict == HealthVerdict::Healthy,
        replaced,
        warnings,
        reclaim,
    })
}

/// Read the live upstream on the system host while listing instances and
/// preparing the deploy directory on the application host.
///
/// # Errors
///
/// Returns [`DeployError::MissingRequiredFiles`] before any change is made,
/// or the first gateway error of either batch.
pub async fn detect(
    remote: &impl RemoteExecutor,
    target: &ContainerTarget<'_>,
    files: &ProxyFiles,
) -> Result<Detected> {
    let config = target.config;
    let deploy_dir = target.deploy_dir();

    let mut system_job = BatchJob::new();
    files.add_reads(&mut system_job, "", config.proxy.use_sudo);

    let mut app_job = BatchJob::new()
        .with("ps", docker::ps_command(&instance_prefix(&config.product, target.environment)))
        .with("deploy-dir", shell::make_dirs(&[&deploy_dir], false));
    for file in &target.docker.required_files {
        app_job.add(format!("required:{file}"), shell::exists(&format!("{deploy_dir}/{file}")));
    }

    let mut system = remote.execute_async(HostRole::System, system_job);
    let mut app = remote.execute_async(APP, app_job);
    let joined = wait_all(&mut [&mut system, &mut app]).await;
    let (system_result, app_result) = match joined {
        Ok(()) => (system.batch().cloned(), app.batch().cloned()),
        Err(err) => {
            system.release();
            app.release();
            return Err(err.context("detecting current deployment"));
        }
    };
    system.release();
    app.release();
    let (system_result, app_result) = (system_result?, app_result?);

    let snapshot = Snapshot::from_result(&system_result, "", files)?;
    let previous_port = snapshot.upstream.as_deref().and_then(proxy::published_port);

    let ps = app_result.get("ps")?;
    if !ps.success() {
        return Err(step_failed(APP, ps).into());
    }
    let dir = app_result.get("deploy-dir")?;
    if !dir.success() {
        return Err(step_failed(APP, dir).into());
    }
    let missing: Vec<String> = target
        .docker
        .required_files
        .iter()
        .filter(|f| {
            app_result
                .exit_code(&format!("required:{f}"))
                .map_or(true, |code| code != 0)
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DeployError::MissingRequiredFiles {
            location: format!("{}:{deploy_dir}", config.hosts.application.destination()),
            missing,
        }
        .into());
    }

    Ok(Detected {
        snapshot,
        previous_port,
        instances: docker::parse_ps(&ps.stdout, &config.product, target.environment),
    })
}

/// Log in (when the provider needs it), pull, make sure the network exists.
async fn prepare_image(
    remote: &impl RemoteExecutor,
    target: &ContainerTarget<'_>,
    opts: &DeployOptions,
) -> Result<()> {
    let registry = &target.config.registry;
    let provider = registry.provider;
    if provider.needs_password() && opts.registry_password.is_none() {
        return Err(DeployError::RegistryLogin {
            provider: provider.as_str().to_string(),
            detail: format!(
                "no password available; set the variable named by registry.password_env ({})",
                registry.password_env.as_deref().unwrap_or("unset")
            ),
        }
        .into());
    }

    let mut job = BatchJob::new();
    if let Some(login) = docker::login_command(registry, opts.registry_password.as_deref()) {
        job.add("login", login);
    }
    job.add("pull", docker::pull_command(&target.docker.image));
    job.add("network", docker::ensure_network_command(&target.docker.network));
    let result = remote.execute(APP, job).await?;

    if let Ok(login) = result.get("login") {
        if !login.success() {
            return Err(DeployError::RegistryLogin {
                provider: provider.as_str().to_string(),
                detail: login.trimmed().to_string(),
            }
            .into());
        }
    }
    if let Some(failed) = first_failure(&result, &["pull", "network"]) {
        return Err(step_failed(APP, failed).into());
    }
    Ok(())
}

/// Start the instance on `port`; on a port conflict, lease one alternate
/// port (excluding the failed one) and try exactly once more.
async fn start_instance(
    remote: &impl RemoteExecutor,
    reporter: &impl ProgressReporter,
    candidates: &mut impl CandidateSource,
    target: &ContainerTarget<'_>,
    instance: &str,
    port: u16,
    exclude: &[u16],
) -> Result<u16> {
    let Some(output) = run_instance(remote, target, instance, port).await? else {
        return Ok(port);
    };
    if !docker::is_port_conflict(&output) {
        return Err(DeployError::StartFailed {
            instance: instance.to_string(),
            detail: output,
        }
        .into());
    }

    reporter.warn(&format!("port {port} was taken before {instance} could bind it; retrying"));
    let mut exclude = exclude.to_vec();
    exclude.push(port);
    let retry = port_allocator::pick(remote, target.config.ports, &exclude, candidates).await?;
    match run_instance(remote, target, instance, retry).await? {
        None => Ok(retry),
        Some(output) if docker::is_port_conflict(&output) => Err(DeployError::BindConflict {
            instance: instance.to_string(),
            port: retry,
            detail: output,
        }
        .into()),
        Some(output) => Err(DeployError::StartFailed {
            instance: instance.to_string(),
            detail: output,
        }
        .into()),
    }
}

/// `docker run` once. Returns the failure output (after removing the
/// half-created container), or `None` on success.
async fn run_instance(
    remote: &impl RemoteExecutor,
    target: &ContainerTarget<'_>,
    instance: &str,
    port: u16,
) -> Result<Option<String>> {
    let docker_cfg = target.docker;
    let env_file = docker_cfg
        .env_file
        .as_ref()
        .map(|f| format!("{}/{f}", target.deploy_dir()));
    let spec = RunSpec {
        name: instance,
        image: &docker_cfg.image,
        network: &docker_cfg.network,
        host_port: port,
        container_port: docker_cfg.container_port,
        env_file: env_file.as_deref(),
        volumes: &docker_cfg.volumes,
        extra_args: &docker_cfg.extra_args,
        product: &target.config.product,
        environment: target.environment,
    };
    let job = BatchJob::new()
        .with("clear", docker::remove_command(instance))
        .with("run", docker::run_command(&spec));
    let result = remote.execute(APP, job).await?;
    let run = result.get("run")?;
    if run.success() {
        tracing::info!(%instance, port, "instance started");
        return Ok(None);
    }
    let output = run.trimmed().to_string();
    tracing::warn!(%instance, port, code = run.exit_code, "docker run failed");
    remove_instance(remote, instance).await;
    Ok(Some(output))
}

/// Poll `docker inspect` every `interval` until healthy, out of retries, or
/// past `deadline`.
///
/// # Errors
///
/// Returns gateway errors only; an unhealthy instance is a verdict.
pub async fn poll_health(
    remote: &impl RemoteExecutor,
    instance: &str,
    retries: u32,
    interval: Duration,
    deadline: Instant,
) -> Result<HealthVerdict> {
    let mut attempts = 0;
    let mut last = HealthStatus::Starting;
    while attempts < retries {
        attempts += 1;
        let outcome = run_one(remote, APP, "health", docker::inspect_health_command(instance)).await?;
        last = docker::parse_health(&outcome.stdout);
        tracing::debug!(%instance, attempt = attempts, status = %last.describe(), "health check");
        match last {
            HealthStatus::Healthy => return Ok(HealthVerdict::Healthy),
            HealthStatus::NoHealthCheck => return Ok(HealthVerdict::Unverified),
            _ => {}
        }
        let next = Instant::now().checked_add(interval);
        if attempts >= retries || next.is_none_or(|next| next > deadline) {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    Ok(HealthVerdict::TimedOut { attempts, last })
}

/// Explicit deadline, or the retry budget plus [`HEALTH_GRACE`]. Saturates
/// at [`FAR_FUTURE`] instead of overflowing.
fn health_deadline(docker: &DockerConfig, opts: &DeployOptions, interval: Duration) -> Instant {
    let budget = opts
        .health_deadline
        .or_else(|| interval.checked_mul(docker.health_retries)?.checked_add(HEALTH_GRACE))
        .unwrap_or(FAR_FUTURE);
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn render_documents(target: &ContainerTarget<'_>, instance: &str, port: u16) -> Documents {
    let backend = backend_name(&target.config.product, target.environment);
    let upstream_target = format!("{}:{port}", target.config.hosts.application.address);
    let site = proxy::render_container_site(&ContainerSite {
        domain: &target.env.domain,
        backend: &backend,
        upstream_target: &upstream_target,
        tls: target.env.tls.as_ref(),
        tuning: &target.env.proxy_tuning,
    });
    tracing::debug!(%instance, %backend, %upstream_target, "rendered proxy documents");
    Documents {
        site,
        upstream: Some(proxy::render_upstream(&backend, &upstream_target)),
    }
}

/// Detach replaced instances from the network, then hand the stable alias to
/// the new one. Traffic has already moved, so problems here are warnings.
async fn cut_over(
    remote: &impl RemoteExecutor,
    docker_cfg: &DockerConfig,
    instance: &str,
    replaced: &[String],
) -> Vec<String> {
    let mut job = BatchJob::new();
    for old in replaced {
        job.add(format!("disconnect:{old}"), docker::disconnect_command(&docker_cfg.network, old));
    }
    if let Some(alias) = &docker_cfg.network_alias {
        job.add("alias", docker::connect_alias_command(&docker_cfg.network, instance, alias));
    }
    if job.is_empty() {
        return Vec::new();
    }

    match remote.execute(APP, job).await {
        Ok(result) => result
            .iter()
            .filter(|o| !o.success())
            .map(|o| format!("cutover step {} failed: {}", o.label, o.trimmed()))
            .inspect(|w| tracing::warn!(%instance, "{w}"))
            .collect(),
        Err(err) => {
            let msg = format!("network cutover for {instance} did not run: {err:#}");
            tracing::warn!("{msg}");
            vec![msg]
        }
    }
}

/// Restore the proxy, remove the new instance, and build the error to report.
async fn roll_back_publish(
    remote: &impl RemoteExecutor,
    target: &ContainerTarget<'_>,
    files: &ProxyFiles,
    detected: &Detected,
    staging: &Staging,
    instance: &str,
    failure: PublishFailure,
) -> anyhow::Error {
    tracing::warn!(environment = %target.environment, %instance, "publishing failed, rolling back");
    let restored = proxy_publish::restore(remote, &target.config.proxy, files, &detected.snapshot, staging).await;
    remove_instance(remote, instance).await;
    if let Err(err) = restored {
        return err;
    }

    let restored_what = if detected.snapshot.is_empty() {
        "first deployment: the new proxy files were removed".to_string()
    } else {
        format!("previous proxy configuration restored; {} keeps serving", describe_previous(detected))
    };
    match failure {
        PublishFailure::Rejected { output } => DeployError::ConfigValidation {
            output,
            remediation: format!(
                "Rolled back ({restored_what}; {instance} removed).\n\
                 Fix proxy_tuning / tls for {} and deploy again.",
                target.environment
            ),
        }
        .into(),
        PublishFailure::Step(err) => err.context(format!(
            "publishing proxy configuration failed; rolled back ({restored_what}; {instance} removed)"
        )),
    }
}

/// Best effort `docker rm -f`; failure is logged since the caller is
/// already reporting a more important error.
async fn remove_instance(remote: &impl RemoteExecutor, instance: &str) {
    match run_one(remote, APP, "remove", docker::remove_command(instance)).await {
        Ok(_) => tracing::info!(%instance, "removed new instance"),
        Err(err) => tracing::warn!(%instance, error = %format!("{err:#}"), "could not remove new instance"),
    }
}

fn describe_previous(detected: &Detected) -> String {
    let live = detected
        .instances
        .iter()
        .find(|c| c.host_port.is_some() && c.host_port == detected.previous_port)
        .or_else(|| detected.instances.first());
    match (live, detected.previous_port) {
        (Some(c), _) => format!("previous instance {}", c.name),
        (None, Some(port)) => format!("the backend on port {port}"),
        (None, None) => "no previous instance".to_string(),
    }
}
