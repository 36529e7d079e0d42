//! Background reclamation of replaced container instances.
//!
//! Started after a successful cutover and not awaited by the deploy itself.
//! Whoever holds the [`ReclaimHandle`] can inspect it, await it, or drop it;
//! failures found when awaiting are logged and returned, never swallowed.

use anyhow::Result;

use crate::application::handles::AsyncHandle;
use crate::application::ports::RemoteExecutor;
use crate::domain::docker::stop_and_remove_command;
use crate::domain::{BatchJob, HostRole};

/// Spawned stop-and-remove of old instances.
pub struct ReclaimHandle {
    environment: String,
    instances: Vec<String>,
    handle: AsyncHandle,
}

impl std::fmt::Debug for ReclaimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimHandle")
            .field("environment", &self.environment)
            .field("instances", &self.instances)
            .field("batch", &self.handle.id())
            .finish()
    }
}

/// What an awaited reclamation achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub removed: Vec<String>,
    /// `(instance, output)` for every instance that did not stop cleanly.
    pub failed: Vec<(String, String)>,
}

/// Start stopping `instances` with `grace_secs` each. Returns `None` when
/// there is nothing to reclaim.
pub fn start(
    remote: &impl RemoteExecutor,
    environment: &str,
    instances: Vec<String>,
    grace_secs: u64,
) -> Option<ReclaimHandle> {
    if instances.is_empty() {
        return None;
    }
    let mut job = BatchJob::new();
    for name in &instances {
        job.add(name.clone(), stop_and_remove_command(name, grace_secs));
    }
    tracing::info!(%environment, count = instances.len(), "reclaiming old instances in background");
    Some(ReclaimHandle {
        environment: environment.to_string(),
        handle: remote.execute_async(HostRole::Application, job),
        instances,
    })
}

impl ReclaimHandle {
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the background batch and classify each instance.
    ///
    /// # Errors
    ///
    /// Returns an error only when the batch itself could not run; per
    /// instance failures are in the report.
    pub async fn finish(mut self) -> Result<ReclaimReport> {
        let waited = self.handle.wait().await;
        if let Err(err) = waited {
            tracing::warn!(environment = %self.environment, error = %format!("{err:#}"), "reclamation failed");
            self.handle.release();
            return Err(err);
        }

        let mut report = ReclaimReport::default();
        for name in &self.instances {
            let outcome = self.handle.result(name)?;
            if outcome.success() {
                report.removed.push(name.clone());
            } else {
                tracing::warn!(
                    environment = %self.environment,
                    instance = %name,
                    code = outcome.exit_code,
                    "old instance was not removed"
                );
                report.failed.push((name.clone(), outcome.trimmed().to_string()));
            }
        }
        self.handle.release();
        Ok(report)
    }
}
