//! Publishing proxy documents on the system host, and putting the previous
//! ones back.
//!
//! New documents are staged under a per-run directory in `/tmp`, moved into
//! place, and checked with the proxy's own config test. The reload that
//! follows a passing test is the cutover instant.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::application::ports::RemoteExecutor;
use crate::application::services::remote::{first_failure, run_one, step_failed};
use crate::domain::config::ProxyConfig;
use crate::domain::naming::config_file_name;
use crate::domain::shell;
use crate::domain::{BatchJob, BatchResult, DeployError, HostRole};

const ROLE: HostRole = HostRole::System;

/// Where one environment's documents live on the system host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyFiles {
    pub site: String,
    /// `None` for static sites, which have no upstream document.
    pub upstream: Option<String>,
}

impl ProxyFiles {
    #[must_use]
    pub fn container(proxy: &ProxyConfig, product: &str, environment: &str) -> Self {
        let name = config_file_name(product, environment);
        Self {
            site: join(&proxy.sites_dir, &name),
            upstream: Some(join(&proxy.upstreams_dir, &name)),
        }
    }

    #[must_use]
    pub fn static_site(proxy: &ProxyConfig, product: &str, environment: &str) -> Self {
        Self {
            site: join(&proxy.sites_dir, &config_file_name(product, environment)),
            upstream: None,
        }
    }

    fn all(&self) -> Vec<&str> {
        std::iter::once(self.site.as_str())
            .chain(self.upstream.as_deref())
            .collect()
    }

    /// Commands capturing the current documents, labelled `{prefix}site` and
    /// `{prefix}upstream`.
    pub fn add_reads(&self, job: &mut BatchJob, prefix: &str, use_sudo: bool) {
        job.add(format!("{prefix}site"), shell::read_file(&self.site, use_sudo));
        if let Some(upstream) = &self.upstream {
            job.add(format!("{prefix}upstream"), shell::read_file(upstream, use_sudo));
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// Documents as they were before this run. `None` means the file did not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub site: Option<String>,
    pub upstream: Option<String>,
}

impl Snapshot {
    /// Read back what [`ProxyFiles::add_reads`] captured.
    ///
    /// # Errors
    ///
    /// Returns an error if the labels are missing from `result`, or a
    /// [`DeployError::RemoteStep`] when a document exists but could not be
    /// read. Rolling back to a guessed state would lose it.
    pub fn from_result(result: &BatchResult, prefix: &str, files: &ProxyFiles) -> Result<Self> {
        let read = |label: String| -> Result<Option<String>> {
            let outcome = result.get(&label)?;
            match outcome.exit_code {
                0 => Ok(Some(outcome.stdout.clone())),
                shell::ABSENT_EXIT => Ok(None),
                _ => Err(anyhow::Error::from(step_failed(ROLE, outcome))
                    .context("reading the live proxy configuration")),
            }
        };
        Ok(Self {
            site: read(format!("{prefix}site"))?,
            upstream: if files.upstream.is_some() {
                read(format!("{prefix}upstream"))?
            } else {
                None
            },
        })
    }

    /// `true` when neither document existed: a first deployment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.site.is_none() && self.upstream.is_none()
    }
}

/// Per-run scratch directory under `/tmp`.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: String,
}

impl Staging {
    #[must_use]
    pub fn new(product: &str, environment: &str, now: DateTime<Utc>) -> Self {
        Self {
            dir: format!("/tmp/tandem-{product}-{environment}-{}", now.timestamp_millis()),
        }
    }

    #[must_use]
    pub fn path(&self, name: &str) -> String {
        format!("{}/{name}", self.dir)
    }

    #[must_use]
    pub fn dir(&self) -> &str {
        &self.dir
    }
}

/// New document contents for one environment.
#[derive(Debug, Clone)]
pub struct Documents {
    pub site: String,
    pub upstream: Option<String>,
}

/// Why publishing stopped before the reload.
#[derive(Debug)]
pub enum PublishFailure {
    /// The proxy's config test rejected the new documents.
    Rejected { output: String },
    /// Staging, installing or reloading failed, or the gateway dropped.
    Step(anyhow::Error),
}

/// Stage, install, test and reload. Nothing is rolled back here.
///
/// # Errors
///
/// Returns [`PublishFailure`]; in every case the installed documents may
/// already differ from the snapshot.
pub async fn publish(
    remote: &impl RemoteExecutor,
    proxy: &ProxyConfig,
    files: &ProxyFiles,
    docs: &Documents,
    staging: &Staging,
) -> Result<(), PublishFailure> {
    let sudo = proxy.use_sudo;
    let mut job = BatchJob::new();
    let mut steps = vec!["stage-site", "dirs", "install-site"];
    job.add("stage-site", shell::write_file(&staging.path("site.conf"), &docs.site));
    job.add("dirs", shell::make_dirs(&[&proxy.sites_dir, &proxy.upstreams_dir], sudo));
    job.add("install-site", shell::move_file(&staging.path("site.conf"), &files.site, sudo));
    if let (Some(dest), Some(doc)) = (&files.upstream, &docs.upstream) {
        job.add("stage-upstream", shell::write_file(&staging.path("upstream.conf"), doc));
        job.add("install-upstream", shell::move_file(&staging.path("upstream.conf"), dest, sudo));
        steps.extend(["stage-upstream", "install-upstream"]);
    }
    job.add("test", format!("{} 2>&1", proxy.test_command));

    let result = remote.execute(ROLE, job).await.map_err(PublishFailure::Step)?;
    if let Some(failed) = first_failure(&result, &steps) {
        return Err(PublishFailure::Step(step_failed(ROLE, failed).into()));
    }
    let test = result.get("test").map_err(|e| PublishFailure::Step(e.into()))?;
    if !test.success() {
        return Err(PublishFailure::Rejected {
            output: test.trimmed().to_string(),
        });
    }

    reload(remote, proxy, staging).await.map_err(PublishFailure::Step)
}

async fn reload(remote: &impl RemoteExecutor, proxy: &ProxyConfig, staging: &Staging) -> Result<()> {
    let job = BatchJob::new()
        .with("reload", format!("{} 2>&1", proxy.reload_command))
        .with("cleanup", shell::remove_tree(&[staging.dir()], false));
    let result = remote.execute(ROLE, job).await?;
    let outcome = result.get("reload")?;
    if !outcome.success() {
        return Err(step_failed(ROLE, outcome).into());
    }
    Ok(())
}

/// Put the snapshot back verbatim (or remove documents that did not exist),
/// then require the proxy test to pass and reload.
///
/// # Errors
///
/// Returns [`DeployError::CriticalRollbackFailure`] if any restore step
/// fails or the proxy test still fails afterwards.
pub async fn restore(
    remote: &impl RemoteExecutor,
    proxy: &ProxyConfig,
    files: &ProxyFiles,
    snapshot: &Snapshot,
    staging: &Staging,
) -> Result<()> {
    let sudo = proxy.use_sudo;
    let mut job = BatchJob::new();
    let mut steps = Vec::new();
    let mut absent = Vec::new();

    let pairs = [
        ("site", Some(files.site.as_str()), snapshot.site.as_deref()),
        ("upstream", files.upstream.as_deref(), snapshot.upstream.as_deref()),
    ];
    for (kind, dest, previous) in pairs {
        let Some(dest) = dest else { continue };
        match previous {
            Some(doc) => {
                let staged = staging.path(&format!("previous-{kind}.conf"));
                job.add(format!("stage-{kind}"), shell::write_file(&staged, doc));
                job.add(format!("restore-{kind}"), shell::move_file(&staged, dest, sudo));
                steps.extend([format!("stage-{kind}"), format!("restore-{kind}")]);
            }
            None => absent.push(dest),
        }
    }
    if !absent.is_empty() {
        job.add("remove-new", shell::remove_files(&absent, sudo));
        steps.push("remove-new".to_string());
    }
    job.add("test", format!("{} 2>&1", proxy.test_command));

    let result = match remote.execute(ROLE, job).await {
        Ok(result) => result,
        Err(err) => return Err(critical(files, format!("restore batch did not complete: {err:#}")).into()),
    };
    let labels: Vec<&str> = steps.iter().map(String::as_str).collect();
    if let Some(failed) = first_failure(&result, &labels) {
        return Err(critical(files, format!("{}: {}", failed.label, failed.trimmed())).into());
    }
    let test = result.get("test")?;
    if !test.success() {
        return Err(critical(files, test.trimmed().to_string()).into());
    }

    reload(remote, proxy, staging)
        .await
        .context("reloading proxy after rollback")?;
    tracing::info!(site = %files.site, first_deploy = snapshot.is_empty(), "proxy configuration restored");
    Ok(())
}

/// Require the proxy's config test to pass after a rollback that left the
/// documents untouched.
///
/// # Errors
///
/// Returns [`DeployError::CriticalRollbackFailure`] when the test fails or
/// cannot run.
pub async fn verify(remote: &impl RemoteExecutor, proxy: &ProxyConfig, files: &ProxyFiles) -> Result<()> {
    let test = run_one(remote, ROLE, "test", format!("{} 2>&1", proxy.test_command))
        .await
        .map_err(|err| critical(files, format!("proxy test did not run: {err:#}")))?;
    if !test.success() {
        return Err(critical(files, test.trimmed().to_string()).into());
    }
    tracing::debug!(site = %files.site, "proxy test passes after rollback");
    Ok(())
}

fn critical(files: &ProxyFiles, output: String) -> DeployError {
    DeployError::CriticalRollbackFailure {
        output,
        files: files.all().join(", "),
    }
}
