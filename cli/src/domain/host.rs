//! Host roles and SSH invocation arguments.
//!
//! Pure functions only; building the argument vector does not touch the
//! network or the filesystem.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The two cooperating hosts a deployment drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    /// Reverse proxy / edge host; owns routing configuration.
    System,
    /// Compute host; runs the containers.
    Application,
}

impl HostRole {
    pub const ALL: [HostRole; 2] = [HostRole::System, HostRole::Application];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HostRole::System => "system",
            HostRole::Application => "application",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to reach one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub address: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key passed with `-i`; the agent / default keys are used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

fn default_user() -> String {
    "deploy".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl HostTarget {
    /// `user@address`, as shown in diagnostics.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

/// Keepalive and timeout knobs for the multiplexed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTuning {
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_max: u32,
    pub persist_secs: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_interval_secs: 15,
            keepalive_max: 3,
            persist_secs: 600,
        }
    }
}

/// Arguments for an `ssh` call that reuses (or opens) the role's control master
/// and runs `bash -s`, reading the script from stdin.
#[must_use]
pub fn session_args(target: &HostTarget, control_path: &Path, tuning: SessionTuning) -> Vec<String> {
    let mut args = base_args(target, control_path);
    args.extend([
        "-o".to_string(),
        "ControlMaster=auto".to_string(),
        "-o".to_string(),
        format!("ControlPersist={}", tuning.persist_secs),
        "-o".to_string(),
        format!("ConnectTimeout={}", tuning.connect_timeout_secs),
        "-o".to_string(),
        format!("ServerAliveInterval={}", tuning.keepalive_interval_secs),
        "-o".to_string(),
        format!("ServerAliveCountMax={}", tuning.keepalive_max),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        target.destination(),
        "bash".to_string(),
        "-s".to_string(),
    ]);
    args
}

/// Arguments asking the control master to exit (`ssh -O exit`).
#[must_use]
pub fn exit_master_args(target: &HostTarget, control_path: &Path) -> Vec<String> {
    let mut args = base_args(target, control_path);
    args.extend(["-O".to_string(), "exit".to_string(), target.destination()]);
    args
}

fn base_args(target: &HostTarget, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        target.port.to_string(),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
    ];
    if let Some(identity) = &target.identity_file {
        args.push("-i".to_string());
        args.push(identity.clone());
        args.push("-o".to_string());
        args.push("IdentitiesOnly=yes".to_string());
    }
    args
}

/// `true` when ssh stderr indicates the multiplexing channel, not the host, failed.
#[must_use]
pub fn is_stale_session(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "mux_client",
        "Control socket connect",
        "ControlSocket",
        "master is dead",
        "muxserver",
        "session open refused",
    ];
    MARKERS.iter().any(|m| stderr.contains(m))
}
