//! Application service: static release cutover.
//!
//! `Locating → Materializing → Linking → Validating → SwappingPointer →
//! PublishingConfig → Pruning`. Everything before the pointer swap happens in
//! a fresh release directory nobody reads yet, so a failure there only has to
//! delete that directory.

use anyhow::{Result, bail};

use crate::application::ports::{Clock, ProgressReporter, RemoteExecutor};
use crate::application::services::proxy_publish::{
    self, Documents, ProxyFiles, PublishFailure, Snapshot, Staging,
};
use crate::application::services::remote::{require_ok, run_one, step_failed};
use crate::domain::config::StaticConfig;
use crate::domain::naming::{ReleasePaths, release_name};
use crate::domain::proxy::{self, StaticSite};
use crate::domain::release;
use crate::domain::shell;
use crate::domain::{BatchJob, DeployConfig, DeployError, EnvironmentConfig, HostRole};

const SYSTEM: HostRole = HostRole::System;

/// One static environment, resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticTarget<'a> {
    pub config: &'a DeployConfig,
    pub environment: &'a str,
    pub env: &'a EnvironmentConfig,
    pub site: &'a StaticConfig,
}

/// A completed static cutover.
#[derive(Debug, Clone)]
pub struct StaticDeployed {
    pub release: String,
    pub previous: Option<String>,
    pub pruned: Vec<String>,
    pub warnings: Vec<String>,
}

/// What `Locating` found on the system host.
#[derive(Debug, Clone)]
struct Located {
    artifact: String,
    previous: Option<String>,
    releases: Vec<String>,
    snapshot: Snapshot,
}

/// Publish the newest staged artifact as a new release.
///
/// # Errors
///
/// Any failure is fatal. Failures before the pointer swap leave the live
/// release untouched; failures after it are returned once rolled back.
pub async fn deploy_static(
    remote: &impl RemoteExecutor,
    clock: &impl Clock,
    reporter: &impl ProgressReporter,
    target: &StaticTarget<'_>,
) -> Result<StaticDeployed> {
    let config = target.config;
    let env_name = target.environment;
    let paths = ReleasePaths::new(&config.deploy_root, env_name);
    let files = ProxyFiles::static_site(&config.proxy, &config.product, env_name);

    reporter.step(&format!("{env_name}: locating build artifact..."));
    let located = locate(remote, target, &paths, &files).await?;

    let now = clock.now();
    let name = release_name(now);
    if located.releases.contains(&name) || located.previous.as_deref() == Some(name.as_str()) {
        bail!("release {name} already exists for {env_name}; wait a second and deploy again");
    }
    let release_dir = paths.release(&name);
    let staging = Staging::new(&config.product, env_name, now);

    reporter.step(&format!("{env_name}: materializing release {name}..."));
    if let Err(err) = materialize(remote, target, &paths, &located.artifact, &release_dir).await {
        discard_release(remote, &release_dir).await;
        return Err(err);
    }

    let swap = release::swap_pointer_command(&release_dir, &paths.current(), &name);
    let swapped = run_one(remote, SYSTEM, "swap", swap).await.and_then(|o| {
        if o.success() {
            Ok(())
        } else {
            Err(step_failed(SYSTEM, &o).into())
        }
    });
    if let Err(err) = swapped {
        discard_release(remote, &release_dir).await;
        return Err(err);
    }
    tracing::info!(environment = %env_name, release = %name, "current pointer swapped");

    reporter.step(&format!("{env_name}: publishing proxy configuration..."));
    let current = paths.current();
    let docs = Documents {
        site: proxy::render_static_site(&StaticSite {
            domain: &target.env.domain,
            root: &current,
            spa: target.site.spa,
            tls: target.env.tls.as_ref(),
            tuning: &target.env.proxy_tuning,
        }),
        upstream: None,
    };
    if let Err(failure) = proxy_publish::publish(remote, &config.proxy, &files, &docs, &staging).await {
        return Err(roll_back(remote, target, &paths, &files, &located, &staging, &name, failure).await);
    }
    reporter.success(&format!("{env_name}: release {name} is live"));

    let mut all = located.releases.clone();
    all.push(name.clone());
    let (pruned, warnings) = prune(remote, &paths, &all, target.site.keep_releases, &name).await;

    Ok(StaticDeployed {
        release: name,
        previous: located.previous,
        pruned,
        warnings,
    })
}

async fn locate(
    remote: &impl RemoteExecutor,
    target: &StaticTarget<'_>,
    paths: &ReleasePaths,
    files: &ProxyFiles,
) -> Result<Located> {
    let mut job = BatchJob::new()
        .with("artifact", release::find_artifact_command(&target.site.artifact_dir))
        .with("current", release::read_link_command(&paths.current()))
        .with("releases", release::list_releases_command(&paths.releases()));
    files.add_reads(&mut job, "", target.config.proxy.use_sudo);
    let result = remote.execute(SYSTEM, job).await?;

    let artifact = require_ok(SYSTEM, &result, "artifact")?.trimmed().to_string();
    if artifact.is_empty() {
        return Err(DeployError::ArtifactNotFound {
            dir: target.site.artifact_dir.clone(),
        }
        .into());
    }
    let current = result.get("current")?;
    let previous = if current.success() {
        release::release_from_link(&current.stdout)
    } else {
        None
    };
    tracing::debug!(%artifact, previous = ?previous, "located artifact");

    Ok(Located {
        artifact,
        previous,
        releases: release::parse_releases(result.stdout("releases")?),
        snapshot: Snapshot::from_result(&result, "", files)?,
    })
}

/// Extract the artifact, then link shared paths and check required files.
async fn materialize(
    remote: &impl RemoteExecutor,
    target: &StaticTarget<'_>,
    paths: &ReleasePaths,
    artifact: &str,
    release_dir: &str,
) -> Result<()> {
    let extracted = run_one(remote, SYSTEM, "extract", release::extract_command(artifact, release_dir)).await?;
    if !extracted.success() {
        return Err(step_failed(SYSTEM, &extracted).into());
    }

    let site = target.site;
    if site.shared_paths.is_empty() && site.required_files.is_empty() {
        return Ok(());
    }
    let shared = paths.shared();
    let mut job = BatchJob::new();
    for path in &site.shared_paths {
        job.add(
            format!("link:{path}"),
            release::link_shared_command(release_dir, &shared, path),
        );
    }
    for file in &site.required_files {
        job.add(
            format!("required:{file}"),
            shell::exists(&format!("{release_dir}/{}", file.trim_start_matches('/'))),
        );
    }
    let result = remote.execute(SYSTEM, job).await?;

    for path in &site.shared_paths {
        require_ok(SYSTEM, &result, &format!("link:{path}"))?;
    }
    let missing: Vec<String> = site
        .required_files
        .iter()
        .filter(|f| {
            result
                .exit_code(&format!("required:{f}"))
                .map_or(true, |code| code != 0)
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DeployError::MissingRequiredFiles {
            location: format!("{}:{release_dir}", target.config.hosts.system.destination()),
            missing,
        }
        .into());
    }
    Ok(())
}

/// Point `current` back at the previous release (or drop it on a first
/// deploy), delete the new release, restore the proxy document. The new
/// release stays when `current` could not be moved off it.
#[allow(clippy::too_many_arguments)]
async fn roll_back(
    remote: &impl RemoteExecutor,
    target: &StaticTarget<'_>,
    paths: &ReleasePaths,
    files: &ProxyFiles,
    located: &Located,
    staging: &Staging,
    name: &str,
    failure: PublishFailure,
) -> anyhow::Error {
    tracing::warn!(environment = %target.environment, release = %name, "publishing failed, rolling back");
    let current = paths.current();
    let repoint = match &located.previous {
        Some(previous) => {
            release::swap_pointer_command(&paths.release(previous), &current, &format!("rollback-{name}"))
        }
        None => shell::remove_files(&[&current], false),
    };
    let repointed = match run_one(remote, SYSTEM, "repoint", repoint).await {
        Ok(outcome) if outcome.success() => Ok(()),
        Ok(outcome) => Err(anyhow::Error::from(step_failed(SYSTEM, &outcome))),
        Err(err) => Err(err),
    };
    if repointed.is_ok() {
        discard_release(remote, &paths.release(name)).await;
    }
    let restored = proxy_publish::restore(remote, &target.config.proxy, files, &located.snapshot, staging).await;

    if let Err(err) = repointed {
        let proxy_state = match &restored {
            Ok(()) => "proxy configuration was restored".to_string(),
            Err(restore_err) => format!("proxy restore failed too: {restore_err:#}"),
        };
        tracing::error!(pointer = %current, release = %name, "could not repoint after failed publish");
        return DeployError::CriticalRollbackFailure {
            output: format!("could not point {current} back; it still references release {name}: {err:#}\n{proxy_state}"),
            files: std::iter::once(current.as_str())
                .chain(restored.is_err().then_some(files.site.as_str()))
                .collect::<Vec<_>>()
                .join(", "),
        }
        .into();
    }
    if let Err(err) = restored {
        return err;
    }

    let restored_what = match &located.previous {
        Some(previous) => format!("current points at {previous} again"),
        None => "first deployment: current pointer and new proxy file removed".to_string(),
    };
    match failure {
        PublishFailure::Rejected { output } => DeployError::ConfigValidation {
            output,
            remediation: format!(
                "Rolled back ({restored_what}; release {name} deleted).\n\
                 Fix proxy_tuning / tls for {} and deploy again.",
                target.environment
            ),
        }
        .into(),
        PublishFailure::Step(err) => err.context(format!(
            "publishing proxy configuration failed; rolled back ({restored_what})"
        )),
    }
}

/// Delete releases beyond `keep`, oldest first. Traffic is already on the
/// new release, so failures become warnings.
async fn prune(
    remote: &impl RemoteExecutor,
    paths: &ReleasePaths,
    releases: &[String],
    keep: usize,
    current: &str,
) -> (Vec<String>, Vec<String>) {
    let doomed = release::releases_to_prune(releases, keep, Some(current));
    if doomed.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let mut job = BatchJob::new();
    for name in &doomed {
        job.add(name.clone(), shell::remove_tree(&[&paths.release(name)], false));
    }

    match remote.execute(SYSTEM, job).await {
        Ok(result) => {
            let mut pruned = Vec::new();
            let mut warnings = Vec::new();
            for outcome in result.iter() {
                if outcome.success() {
                    pruned.push(outcome.label.clone());
                } else {
                    warnings.push(format!("could not prune release {}: {}", outcome.label, outcome.trimmed()));
                }
            }
            tracing::info!(count = pruned.len(), "pruned old releases");
            (pruned, warnings)
        }
        Err(err) => {
            let msg = format!("pruning skipped: {err:#}");
            tracing::warn!("{msg}");
            (Vec::new(), vec![msg])
        }
    }
}

/// Remove a release that is not live, or no longer is.
async fn discard_release(remote: &impl RemoteExecutor, release_dir: &str) {
    if let Err(err) = run_one(remote, SYSTEM, "discard", shell::remove_tree(&[release_dir], false)).await {
        tracing::warn!(release = %release_dir, error = %format!("{err:#}"), "could not delete failed release");
    }
}
