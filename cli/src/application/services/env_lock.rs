//! Per-environment deploy lock held on the system host for the duration of
//! one orchestration run.

use anyhow::Result;

use crate::application::ports::{ProgressReporter, RemoteExecutor};
use crate::application::services::remote::{run_one, step_failed};
use crate::domain::config::ProxyConfig;
use crate::domain::lock::{self, LockState};
use crate::domain::{DeployError, HostRole};

/// Proof that this run owns the environment's lock.
#[derive(Debug)]
#[must_use = "the lock stays held on the remote host until released"]
pub struct EnvLock {
    path: String,
    token: String,
}

impl EnvLock {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Take the lock for `product`/`environment`.
///
/// # Errors
///
/// Returns [`DeployError::EnvironmentLocked`] naming the holder, or a
/// remote/gateway error.
pub async fn acquire(
    remote: &impl RemoteExecutor,
    reporter: &impl ProgressReporter,
    proxy: &ProxyConfig,
    product: &str,
    environment: &str,
    token: &str,
) -> Result<EnvLock> {
    let path = lock::lock_path(&proxy.lock_dir, product, environment);
    let outcome = run_one(
        remote,
        HostRole::System,
        "lock",
        lock::acquire_command(&path, token, proxy.lock_stale_secs),
    )
    .await?;
    if !outcome.success() {
        return Err(step_failed(HostRole::System, &outcome).into());
    }

    match lock::parse_acquire(&outcome.stdout) {
        LockState::Acquired => {}
        LockState::BrokeStale => {
            reporter.warn(&format!("broke an abandoned deploy lock for {environment}"));
            tracing::warn!(%environment, lock = %path, "stale lock replaced");
        }
        LockState::Held(holder) => {
            return Err(DeployError::EnvironmentLocked {
                environment: environment.to_string(),
                holder,
                lock_path: path,
            }
            .into());
        }
    }
    tracing::debug!(%environment, lock = %path, "lock acquired");
    Ok(EnvLock {
        path,
        token: token.to_string(),
    })
}

/// Release the lock. Failures are logged: a leftover lock goes stale on its own.
pub async fn release(remote: &impl RemoteExecutor, lock: EnvLock) {
    let script = lock::release_command(&lock.path, &lock.token);
    match run_one(remote, HostRole::System, "unlock", script).await {
        Ok(outcome) if outcome.success() => tracing::debug!(lock = %lock.path, "lock released"),
        Ok(outcome) => tracing::warn!(lock = %lock.path, code = outcome.exit_code, "lock release failed"),
        Err(err) => tracing::warn!(lock = %lock.path, error = %format!("{err:#}"), "lock release failed"),
    }
}
