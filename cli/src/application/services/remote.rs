//! Helpers for turning batch outcomes into deployment steps.

use anyhow::Result;

use crate::application::ports::RemoteExecutor;
use crate::domain::{BatchJob, BatchResult, CommandOutcome, DeployError, HostRole};

/// Fail with [`DeployError::RemoteStep`] unless `label` exited 0.
///
/// # Errors
///
/// Returns an error for an unknown label or a non-zero exit.
pub fn require_ok<'a>(role: HostRole, result: &'a BatchResult, label: &str) -> Result<&'a CommandOutcome> {
    let outcome = result.get(label)?;
    if outcome.success() {
        Ok(outcome)
    } else {
        Err(step_failed(role, outcome).into())
    }
}

/// Error value for a command that exited non-zero.
#[must_use]
pub fn step_failed(role: HostRole, outcome: &CommandOutcome) -> DeployError {
    DeployError::RemoteStep {
        role,
        step: outcome.label.clone(),
        code: outcome.exit_code,
        output: outcome.trimmed().to_string(),
    }
}

/// Run a single labelled command and wait for it.
///
/// # Errors
///
/// Returns transport errors only; the exit code is left to the caller.
pub async fn run_one(
    remote: &impl RemoteExecutor,
    role: HostRole,
    label: &str,
    script: impl Into<String>,
) -> Result<CommandOutcome> {
    let result = remote.execute(role, BatchJob::new().with(label, script)).await?;
    Ok(result.get(label)?.clone())
}

/// First failing outcome among `labels`, in order.
#[must_use]
pub fn first_failure<'a>(result: &'a BatchResult, labels: &[&str]) -> Option<&'a CommandOutcome> {
    labels
        .iter()
        .filter_map(|l| result.get(l).ok())
        .find(|o| !o.success())
}
