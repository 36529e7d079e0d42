//! Deployment configuration schema and validation.
//!
//! Pure types only; loading from disk lives in `crate::infra::config`.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::host::{HostRole, HostTarget, SessionTuning};

// ── Top level ────────────────────────────────────────────────────────────────

/// Resolved configuration for one product across its environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Product name; prefix of every instance and config file.
    pub product: String,
    pub hosts: Hosts,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ports: PortRange,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    /// Root for deploy directories (application host) and static releases
    /// (system host).
    #[serde(default = "default_deploy_root")]
    pub deploy_root: String,
    /// Roll back automatically on failed health checks or proxy validation.
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

fn default_deploy_root() -> String {
    "/srv/tandem".to_string()
}

fn default_true() -> bool {
    true
}

/// Addresses of the two host roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hosts {
    pub system: HostTarget,
    pub application: HostTarget,
}

impl Hosts {
    #[must_use]
    pub fn get(&self, role: HostRole) -> &HostTarget {
        match role {
            HostRole::System => &self.system,
            HostRole::Application => &self.application,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryProvider {
    /// Public images; no login.
    #[default]
    None,
    Dockerhub,
    Ghcr,
    Ecr,
    Generic,
}

impl RegistryProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RegistryProvider::None => "none",
            RegistryProvider::Dockerhub => "dockerhub",
            RegistryProvider::Ghcr => "ghcr",
            RegistryProvider::Ecr => "ecr",
            RegistryProvider::Generic => "generic",
        }
    }

    /// Providers that log in with a password from the local environment.
    #[must_use]
    pub fn needs_password(self) -> bool {
        matches!(
            self,
            RegistryProvider::Dockerhub | RegistryProvider::Ghcr | RegistryProvider::Generic
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    pub provider: RegistryProvider,
    /// Registry host, e.g. `ghcr.io` or `123.dkr.ecr.eu-west-1.amazonaws.com`.
    pub server: Option<String>,
    pub username: Option<String>,
    /// Name of the local environment variable holding the password/token.
    pub password_env: Option<String>,
    /// AWS region, ECR only.
    pub region: Option<String>,
}

// ── Ports ────────────────────────────────────────────────────────────────────

/// Inclusive range the port allocator draws from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
    pub max_attempts: u32,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 30000,
            end: 32767,
            max_attempts: 50,
        }
    }
}

impl PortRange {
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

// ── Proxy ────────────────────────────────────────────────────────────────────

/// Where the proxy keeps its documents and how to test/reload it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub sites_dir: String,
    pub upstreams_dir: String,
    pub test_command: String,
    pub reload_command: String,
    /// Prefix file moves/removals with `sudo`.
    pub use_sudo: bool,
    /// Directory holding per-environment deploy locks.
    pub lock_dir: String,
    /// Locks older than this are considered abandoned.
    pub lock_stale_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sites_dir: "/etc/nginx/sites-enabled".to_string(),
            upstreams_dir: "/etc/nginx/upstreams".to_string(),
            test_command: "sudo nginx -t".to_string(),
            reload_command: "sudo systemctl reload nginx".to_string(),
            use_sudo: true,
            lock_dir: "/tmp/tandem-locks".to_string(),
            lock_stale_secs: 1800,
        }
    }
}

// ── SSH ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_max: u32,
    /// Upper bound on one batch round trip.
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        let tuning = SessionTuning::default();
        Self {
            connect_timeout_secs: tuning.connect_timeout_secs,
            keepalive_interval_secs: tuning.keepalive_interval_secs,
            keepalive_max: tuning.keepalive_max,
            command_timeout_secs: 600,
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn tuning(&self) -> SessionTuning {
        SessionTuning {
            connect_timeout_secs: self.connect_timeout_secs,
            keepalive_interval_secs: self.keepalive_interval_secs,
            keepalive_max: self.keepalive_max,
            ..SessionTuning::default()
        }
    }
}

// ── Environments ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployKind {
    Docker,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub domain: String,
    pub kind: DeployKind,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub proxy_tuning: ProxyTuning,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
    #[serde(default, rename = "static")]
    pub static_site: Option<StaticConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub certificate: String,
    pub certificate_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyTuning {
    pub client_max_body_size: String,
    pub read_timeout_secs: u32,
    pub connect_timeout_secs: u32,
    /// Raw directives appended inside the `server` block.
    pub custom_directives: Vec<String>,
}

impl Default for ProxyTuning {
    fn default() -> Self {
        Self {
            client_max_body_size: "10m".to_string(),
            read_timeout_secs: 60,
            connect_timeout_secs: 5,
            custom_directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub image: String,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_network")]
    pub network: String,
    /// Stable internal alias moved to the new instance at cutover.
    #[serde(default)]
    pub network_alias: Option<String>,
    /// Env file relative to the environment's deploy directory.
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_health_retries")]
    pub health_retries: u32,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    /// Files that must exist in the deploy directory before anything starts.
    #[serde(default)]
    pub required_files: Vec<String>,
}

fn default_container_port() -> u16 {
    3000
}

fn default_network() -> String {
    "tandem".to_string()
}

/// Upper bound for `health_interval_secs`.
pub const MAX_HEALTH_INTERVAL_SECS: u64 = 3600;
/// Upper bound for `health_retries`.
pub const MAX_HEALTH_RETRIES: u32 = 10_000;
/// Upper bound for an explicit health deadline (one day).
pub const MAX_HEALTH_TIMEOUT_SECS: u64 = 86_400;

fn default_health_retries() -> u32 {
    30
}

fn default_health_interval() -> u64 {
    2
}

fn default_stop_grace() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Directory on the system host where build artifacts are staged.
    pub artifact_dir: String,
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,
    /// Paths inside a release that point into shared storage.
    #[serde(default)]
    pub shared_paths: Vec<String>,
    #[serde(default)]
    pub required_files: Vec<String>,
    /// Fall back to `/index.html` for unknown paths.
    #[serde(default)]
    pub spa: bool,
}

fn default_keep_releases() -> usize {
    5
}

// ── Validation ───────────────────────────────────────────────────────────────

impl DeployConfig {
    /// Look up an environment by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] listing configured names.
    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments.get(name).ok_or_else(|| {
            ConfigError::UnknownEnvironment {
                name: name.to_string(),
                known: self.environment_names().join(", "),
            }
            .into()
        })
    }

    #[must_use]
    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Check cross-field invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<()> {
        if !is_slug(&self.product) {
            return Err(invalid("product", "must be non-empty [a-z0-9-]"));
        }
        if self.ports.start < 1024 || self.ports.start > self.ports.end {
            return Err(invalid(
                "ports",
                "start must be >= 1024 and not greater than end",
            ));
        }
        if self.ports.max_attempts == 0 {
            return Err(invalid("ports.max_attempts", "must be at least 1"));
        }
        if self.environments.is_empty() {
            return Err(invalid("environments", "at least one environment is required"));
        }
        for (name, env) in &self.environments {
            if !is_slug(name) {
                return Err(invalid(
                    &format!("environments.{name}"),
                    "name must be non-empty [a-z0-9-]",
                ));
            }
            if env.domain.trim().is_empty() {
                return Err(invalid(&format!("environments.{name}.domain"), "must not be empty"));
            }
            match env.kind {
                DeployKind::Docker => {
                    let Some(docker) = &env.docker else {
                        return Err(invalid(
                            &format!("environments.{name}.docker"),
                            "required when kind is docker",
                        ));
                    };
                    if docker.image.trim().is_empty() {
                        return Err(invalid(
                            &format!("environments.{name}.docker.image"),
                            "must not be empty",
                        ));
                    }
                    if !(1..=MAX_HEALTH_RETRIES).contains(&docker.health_retries) {
                        return Err(invalid(
                            &format!("environments.{name}.docker.health_retries"),
                            &format!("must be between 1 and {MAX_HEALTH_RETRIES}"),
                        ));
                    }
                    if !(1..=MAX_HEALTH_INTERVAL_SECS).contains(&docker.health_interval_secs) {
                        return Err(invalid(
                            &format!("environments.{name}.docker.health_interval_secs"),
                            &format!("must be between 1 and {MAX_HEALTH_INTERVAL_SECS}"),
                        ));
                    }
                }
                DeployKind::Static => {
                    let Some(site) = &env.static_site else {
                        return Err(invalid(
                            &format!("environments.{name}.static"),
                            "required when kind is static",
                        ));
                    };
                    if site.keep_releases == 0 {
                        return Err(invalid(
                            &format!("environments.{name}.static.keep_releases"),
                            "must be at least 1",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn invalid(field: &str, reason: &str) -> anyhow::Error {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// ── Unit tests ───────────────────────────────────────────────────────────────
