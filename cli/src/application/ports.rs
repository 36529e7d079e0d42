//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`; never from `crate::infra`,
//! `crate::commands`, or `crate::output`.
//!
//! Async methods are declared as `impl Future + Send` so that implementations
//! can be driven from spawned tasks (background reclamation, fork-join
//! detection). Implementors may still write plain `async fn`.

use std::future::Future;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::application::handles::AsyncHandle;
use crate::domain::{BatchJob, BatchResult, DeployConfig, HostRole};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts local process execution so the gateway can be tested without
/// spawning `ssh`.
pub trait CommandRunner: Send + Sync {
    /// Run a program with the instance's default timeout.
    fn run(&self, program: &str, args: &[&str]) -> impl Future<Output = Result<Output>> + Send;

    /// Run a program with stdin piped from `input`, bounded by `timeout`.
    ///
    /// On timeout the child process must be killed (not left orphaned) and an
    /// error returned.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Output>> + Send;
}

// ── Remote Execution Port ─────────────────────────────────────────────────────

/// Batched command execution on a host role.
///
/// Session-level failures are recovered inside the implementation; anything
/// returned as `Err` is fatal for the caller.
pub trait RemoteExecutor: Send + Sync {
    /// Run every command of `job` in one round trip and wait for the results.
    fn execute(
        &self,
        role: HostRole,
        job: BatchJob,
    ) -> impl Future<Output = Result<BatchResult>> + Send;

    /// Start `job` in the background. The returned handle must be waited on
    /// before its results can be read.
    fn execute_async(&self, role: HostRole, job: BatchJob) -> AsyncHandle;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait; no async needed.
pub trait ProgressReporter: Send + Sync {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Clock Port ────────────────────────────────────────────────────────────────

/// Source of "now" for instance and release names.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// ── Config Port ───────────────────────────────────────────────────────────────

/// Loads the resolved deployment configuration.
pub trait ConfigStore {
    /// Load, apply environment overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparseable, or invalid.
    fn load(&self) -> Result<DeployConfig>;

    /// Path the configuration is read from.
    fn path(&self) -> &Path;
}
