//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

use crate::domain::host::HostRole;

// ── Gateway errors ────────────────────────────────────────────────────────────

/// Errors raised by the remote execution gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(
        "cannot reach the {role} host ({target}): {detail}\n\n\
         Check the address, user and identity file under hosts.{role} in the config,\n\
         then confirm with: ssh {target} true"
    )]
    Connection {
        role: HostRole,
        target: String,
        detail: String,
    },

    #[error("control session for the {role} host is stale: {detail}")]
    StaleSession { role: HostRole, detail: String },

    #[error("remote batch on the {role} host timed out after {secs}s")]
    Timeout { role: HostRole, secs: u64 },

    #[error("label '{0}' appears more than once in the same batch")]
    DuplicateLabel(String),

    #[error("no command labelled '{0}' in this batch")]
    UnknownLabel(String),

    #[error("remote output ended before command '{label}' finished (ssh session dropped?)")]
    Truncated { label: String },

    #[error("async batch {0} has not been waited on yet")]
    NotWaited(String),
}

// ── Deployment errors ─────────────────────────────────────────────────────────

/// Orchestration-level failures. Every message ends with the operator action.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(
        "no free port in {start}-{end} after {attempts} attempts.\n\
         Free ports on the application host or widen ports.start/ports.end."
    )]
    PortExhaustion { start: u16, end: u16, attempts: u32 },

    #[error(
        "container {instance} could not bind port {port}: {detail}\n\
         The previous instance is still live. Retry the deploy."
    )]
    BindConflict {
        instance: String,
        port: u16,
        detail: String,
    },

    #[error(
        "container {instance} failed to start: {detail}\n\
         The previous instance is still live. Inspect with: docker logs {instance}"
    )]
    StartFailed { instance: String, detail: String },

    #[error(
        "{instance} did not report healthy after {attempts} checks (last status: {last_status}).\n\
         {remediation}"
    )]
    HealthCheckTimeout {
        instance: String,
        attempts: u32,
        last_status: String,
        remediation: String,
    },

    #[error("proxy rejected the new configuration:\n{output}\n{remediation}")]
    ConfigValidation { output: String, remediation: String },

    #[error(
        "CRITICAL: rollback left the system host in an unverified state:\n{output}\n\
         Manual intervention required on the system host before the next deploy.\n\
         Run the proxy test command there and repair {files}."
    )]
    CriticalRollbackFailure { output: String, files: String },

    #[error(
        "required files missing in {location}: {}\n\
         Create them before deploying; nothing was changed.",
        missing.join(", ")
    )]
    MissingRequiredFiles {
        location: String,
        missing: Vec<String>,
    },

    #[error("no build artifact found in {dir}.\nUpload a .tar.gz build there first.")]
    ArtifactNotFound { dir: String },

    #[error(
        "environment {environment} is locked by another deploy ({holder}).\n\
         Wait for it to finish, or remove {lock_path} on the system host if it crashed."
    )]
    EnvironmentLocked {
        environment: String,
        holder: String,
        lock_path: String,
    },

    #[error("registry login for {provider} failed: {detail}\nCheck the registry credentials.")]
    RegistryLogin { provider: String, detail: String },

    #[error("remote step '{step}' failed on the {role} host (exit {code}): {output}")]
    RemoteStep {
        role: HostRole,
        step: String,
        code: i32,
        output: String,
    },
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to deployment configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config field '{field}' is invalid: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unknown environment '{name}'. Configured: {known}")]
    UnknownEnvironment { name: String, known: String },
}
