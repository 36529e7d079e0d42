//! Remote execution gateway over multiplexed SSH sessions.
//!
//! One control master per host role, opened lazily by the first batch
//! (`ControlMaster=auto`) and reused by every later batch through a control
//! socket in a private temp directory. The gateway is owned by the top-level
//! run and torn down with [`Gateway::close`]; dropping it removes the socket
//! directory.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng as _;

use crate::application::handles::AsyncHandle;
use crate::application::ports::{CommandRunner, RemoteExecutor};
use crate::domain::config::{Hosts, SshConfig};
use crate::domain::host::{self, HostRole, SessionTuning};
use crate::domain::{BatchJob, BatchResult, Framing, GatewayError};
use crate::infra::command_runner::TimedOut;

/// SSH exits with 255 for its own failures; anything else came from the remote.
const SSH_FAILURE: i32 = 255;

/// Multiplexed SSH gateway for the system and application hosts.
pub struct Gateway<R: CommandRunner + 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: CommandRunner + 'static> Clone for Gateway<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<R> {
    runner: R,
    hosts: Hosts,
    tuning: SessionTuning,
    batch_timeout: Duration,
    control_dir: tempfile::TempDir,
    opened: Mutex<HashSet<HostRole>>,
    seq: AtomicU64,
}

impl<R: CommandRunner + 'static> Gateway<R> {
    /// Build a gateway; no connection is made until the first batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the control-socket directory cannot be created.
    pub fn new(runner: R, hosts: Hosts, ssh: &SshConfig) -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("tandem-mux-")
            .tempdir()
            .context("creating ssh control socket directory")?;
        Ok(Self {
            inner: Arc::new(Inner {
                runner,
                hosts,
                tuning: ssh.tuning(),
                batch_timeout: Duration::from_secs(ssh.command_timeout_secs),
                control_dir,
                opened: Mutex::new(HashSet::new()),
                seq: AtomicU64::new(0),
            }),
        })
    }

    /// Control socket used for `role`.
    #[must_use]
    pub fn control_path(&self, role: HostRole) -> PathBuf {
        self.inner.control_path(role)
    }

    /// Roles with a session opened by this gateway.
    #[must_use]
    pub fn open_roles(&self) -> Vec<HostRole> {
        let opened = self.inner.opened.lock().unwrap_or_else(PoisonError::into_inner);
        HostRole::ALL.into_iter().filter(|r| opened.contains(r)).collect()
    }

    /// Ask every opened control master to exit. Failures are logged, not
    /// returned: by this point the run's outcome is already decided.
    pub async fn close(self) {
        for role in self.open_roles() {
            self.inner.reset(role).await;
        }
    }
}

impl<R: CommandRunner + 'static> Inner<R> {
    fn control_path(&self, role: HostRole) -> PathBuf {
        self.control_dir.path().join(format!("{role}.sock"))
    }

    /// Log the first use of a role; later batches reuse the session silently.
    fn announce(&self, role: HostRole) {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if opened.insert(role) {
            let target = self.hosts.get(role);
            tracing::info!(%role, destination = %target.destination(), "opening ssh session");
        }
    }

    async fn run_batch(&self, role: HostRole, job: BatchJob) -> Result<BatchResult> {
        job.validate()?;
        if job.is_empty() {
            return Ok(BatchResult::default());
        }
        self.announce(role);

        let nonce = format!("{:032x}", rand::thread_rng().r#gen::<u128>());
        let framing = Framing::new(nonce);
        let script = framing.render(&job);
        tracing::debug!(%role, commands = job.len(), "executing batch");

        let stdout = match self.round_trip(role, &script).await {
            Err(GatewayError::StaleSession { detail, .. }) => {
                tracing::warn!(%role, %detail, "stale ssh session, reconnecting");
                self.reset(role).await;
                self.announce(role);
                match self.round_trip(role, &script).await {
                    Err(GatewayError::StaleSession { detail, .. }) => {
                        return Err(self.connection_error(role, format!("session stale after reconnect: {detail}")).into());
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        Ok(framing.parse(&job, &stdout)?)
    }

    async fn round_trip(&self, role: HostRole, script: &str) -> Result<String, GatewayError> {
        let target = self.hosts.get(role);
        let args = host::session_args(target, &self.control_path(role), self.tuning);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = match self
            .runner
            .run_with_stdin("ssh", &args, script.as_bytes(), self.batch_timeout)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if let Some(timed_out) = err.downcast_ref::<TimedOut>() {
                    return Err(GatewayError::Timeout {
                        role,
                        secs: timed_out.secs,
                    });
                }
                return Err(self.connection_error(role, format!("{err:#}")));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(SSH_FAILURE) if host::is_stale_session(&stderr) => Err(GatewayError::StaleSession {
                role,
                detail: stderr.trim().to_string(),
            }),
            Some(code) => Err(self.connection_error(
                role,
                format!("ssh exited with {code}: {}", stderr.trim()),
            )),
            None => Err(self.connection_error(role, "ssh terminated by signal".to_string())),
        }
    }

    /// Close the role's control master and forget its socket.
    async fn reset(&self, role: HostRole) {
        let target = self.hosts.get(role);
        let path = self.control_path(role);
        let args = host::exit_master_args(target, &path);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(err) = self.runner.run("ssh", &args).await {
            tracing::debug!(%role, error = %format!("{err:#}"), "ssh -O exit failed");
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::debug!(%role, error = %err, "removing control socket failed"),
        }
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&role);
    }

    fn connection_error(&self, role: HostRole, detail: String) -> GatewayError {
        GatewayError::Connection {
            role,
            target: self.hosts.get(role).destination(),
            detail,
        }
    }
}

impl<R: CommandRunner + 'static> RemoteExecutor for Gateway<R> {
    async fn execute(&self, role: HostRole, job: BatchJob) -> Result<BatchResult> {
        self.inner.run_batch(role, job).await
    }

    fn execute_async(&self, role: HostRole, job: BatchJob) -> AsyncHandle {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        AsyncHandle::spawn(role, format!("{role}#{seq}"), async move {
            inner.run_batch(role, job).await
        })
    }
}
