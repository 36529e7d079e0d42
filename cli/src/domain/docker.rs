//! Container runtime command builders and output parsers.
//!
//! Pure functions only; the strings produced here are executed on the
//! application host through the gateway.

use regex::Regex;

use crate::domain::config::{RegistryConfig, RegistryProvider};
use crate::domain::naming::is_instance_of;
use crate::domain::shell::quote;

/// A container of this product+environment seen by `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    /// Host port published for the container, when any.
    pub host_port: Option<u16>,
}

/// Lists every container (running or not) as `name<TAB>ports`.
#[must_use]
pub fn ps_command(prefix: &str) -> String {
    format!(
        "docker ps -a --filter {} --format '{{{{.Names}}}}\t{{{{.Ports}}}}'",
        quote(&format!("name=^{prefix}"))
    )
}

/// Parse [`ps_command`] output, keeping only instances of this product+environment.
#[must_use]
pub fn parse_ps(output: &str, product: &str, environment: &str) -> Vec<ContainerInfo> {
    let port_re = Regex::new(r":(\d+)->").ok();
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let name = parts.next()?.trim();
            if !is_instance_of(name, product, environment) {
                return None;
            }
            let ports = parts.next().unwrap_or("");
            let host_port = port_re
                .as_ref()
                .and_then(|re| re.captures(ports))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());
            Some(ContainerInfo {
                name: name.to_string(),
                host_port,
            })
        })
        .collect()
}

/// Health as reported by `docker inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Starting,
    Unhealthy,
    /// The image defines no HEALTHCHECK; readiness cannot be verified.
    NoHealthCheck,
    /// Container is not running (exited, dead, missing).
    NotRunning(String),
}

impl HealthStatus {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            HealthStatus::Healthy => "healthy".to_string(),
            HealthStatus::Starting => "starting".to_string(),
            HealthStatus::Unhealthy => "unhealthy".to_string(),
            HealthStatus::NoHealthCheck => "no health check".to_string(),
            HealthStatus::NotRunning(state) => format!("not running ({state})"),
        }
    }
}

/// Prints `<state>|<health or none>`.
#[must_use]
pub fn inspect_health_command(name: &str) -> String {
    format!(
        "docker inspect --format '{{{{.State.Status}}}}|{{{{if .State.Health}}}}{{{{.State.Health.Status}}}}{{{{else}}}}none{{{{end}}}}' {} 2>/dev/null || echo 'missing|none'",
        quote(name)
    )
}

/// Parse [`inspect_health_command`] output.
#[must_use]
pub fn parse_health(output: &str) -> HealthStatus {
    let line = output.trim();
    let (state, health) = line.split_once('|').unwrap_or((line, "none"));
    if state != "running" {
        return HealthStatus::NotRunning(if state.is_empty() { "unknown" } else { state }.to_string());
    }
    match health {
        "healthy" => HealthStatus::Healthy,
        "starting" => HealthStatus::Starting,
        "none" => HealthStatus::NoHealthCheck,
        _ => HealthStatus::Unhealthy,
    }
}

/// `true` when `docker run` output points at the host port being taken.
#[must_use]
pub fn is_port_conflict(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("port is already allocated")
        || lower.contains("address already in use")
        || lower.contains("bind for 0.0.0.0")
}

/// Everything `docker run` needs for a new instance.
#[derive(Debug, Clone)]
pub struct RunSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub network: &'a str,
    pub host_port: u16,
    pub container_port: u16,
    pub env_file: Option<&'a str>,
    pub volumes: &'a [String],
    pub extra_args: &'a [String],
    pub product: &'a str,
    pub environment: &'a str,
}

/// `docker run -d ...` with stderr folded into stdout for diagnosis.
#[must_use]
pub fn run_command(spec: &RunSpec<'_>) -> String {
    let mut cmd = format!(
        "docker run -d --name {} --restart unless-stopped --network {} -p {}:{} --label {} --label {}",
        quote(spec.name),
        quote(spec.network),
        spec.host_port,
        spec.container_port,
        quote(&format!("tandem.product={}", spec.product)),
        quote(&format!("tandem.environment={}", spec.environment)),
    );
    if let Some(env_file) = spec.env_file {
        cmd.push_str(&format!(" --env-file {}", quote(env_file)));
    }
    for volume in spec.volumes {
        cmd.push_str(&format!(" -v {}", quote(volume)));
    }
    for arg in spec.extra_args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd.push(' ');
    cmd.push_str(&quote(spec.image));
    cmd.push_str(" 2>&1");
    cmd
}

/// Create the network if it does not exist yet.
#[must_use]
pub fn ensure_network_command(network: &str) -> String {
    let n = quote(network);
    format!("docker network inspect {n} >/dev/null 2>&1 || docker network create {n} 2>&1")
}

/// Remove a same-named leftover from an earlier attempt; never fails.
#[must_use]
pub fn remove_command(name: &str) -> String {
    format!("docker rm -f {} >/dev/null 2>&1 || true", quote(name))
}

/// Graceful stop followed by removal.
#[must_use]
pub fn stop_and_remove_command(name: &str, grace_secs: u64) -> String {
    let n = quote(name);
    format!("docker stop --time {grace_secs} {n} 2>&1 && docker rm {n} 2>&1")
}

/// Detach `name` from `network`, dropping any alias it held there.
#[must_use]
pub fn disconnect_command(network: &str, name: &str) -> String {
    format!(
        "docker network disconnect {} {} 2>&1 || true",
        quote(network),
        quote(name)
    )
}

/// Re-attach `name` to `network` under `alias`.
#[must_use]
pub fn connect_alias_command(network: &str, name: &str, alias: &str) -> String {
    let (n, c) = (quote(network), quote(name));
    format!(
        "docker network disconnect {n} {c} >/dev/null 2>&1; docker network connect --alias {} {n} {c} 2>&1",
        quote(alias)
    )
}

/// `docker pull` with output folded for diagnosis.
#[must_use]
pub fn pull_command(image: &str) -> String {
    format!("docker pull {} 2>&1", quote(image))
}

/// Provider-specific `docker login`, or `None` when no login is needed.
///
/// `password` is the resolved secret for providers that take one.
#[must_use]
pub fn login_command(registry: &RegistryConfig, password: Option<&str>) -> Option<String> {
    let user = registry.username.as_deref().unwrap_or("");
    match registry.provider {
        RegistryProvider::None => None,
        RegistryProvider::Ecr => {
            let server = registry.server.as_deref().unwrap_or("");
            let region = registry.region.as_deref().unwrap_or("us-east-1");
            Some(format!(
                "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {} 2>&1",
                quote(region),
                quote(server)
            ))
        }
        RegistryProvider::Dockerhub | RegistryProvider::Ghcr | RegistryProvider::Generic => {
            let server = match registry.provider {
                RegistryProvider::Ghcr => registry.server.as_deref().or(Some("ghcr.io")),
                RegistryProvider::Generic => registry.server.as_deref(),
                _ => None,
            };
            let mut cmd = format!(
                "printf '%s' {} | docker login --username {} --password-stdin",
                quote(password.unwrap_or("")),
                quote(user)
            );
            if let Some(server) = server {
                cmd.push(' ');
                cmd.push_str(&quote(server));
            }
            cmd.push_str(" 2>&1");
            Some(cmd)
        }
    }
}
