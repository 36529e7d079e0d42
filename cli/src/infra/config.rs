//! Infrastructure implementation of the `ConfigStore` port.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::ConfigStore;
use crate::domain::config::DeployConfig;
use crate::domain::error::ConfigError;

/// Env var naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "TANDEM_CONFIG";
/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tandem.yaml";

const PORT_START_ENV: &str = "TANDEM_PORT_RANGE_START";
const PORT_END_ENV: &str = "TANDEM_PORT_RANGE_END";

/// Production implementation of `ConfigStore` that reads a YAML file on disk.
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    /// Use `explicit` if given, then `$TANDEM_CONFIG`, then `./tandem.yaml`.
    #[must_use]
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let path = explicit.map_or_else(
            || {
                std::env::var_os(CONFIG_ENV)
                    .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
            },
            Path::to_path_buf,
        );
        Self { path }
    }

    /// Parse without touching the environment (used by tests and `resolve`).
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed, an override is not a port
    /// number, or validation fails.
    pub fn parse_with(
        content: &str,
        origin: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<DeployConfig> {
        let mut config: DeployConfig = serde_yaml::from_str(content)
            .with_context(|| format!("cannot parse {}", origin.display()))?;
        apply_overrides(&mut config, env)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", origin.display()))?;
        Ok(config)
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<DeployConfig> {
        let content = std::fs::read_to_string(&self.path).with_context(|| {
            format!(
                "cannot read {} (pass --config or set {CONFIG_ENV})",
                self.path.display()
            )
        })?;
        let config = Self::parse_with(&content, &self.path, |key| std::env::var(key).ok())?;
        tracing::debug!(path = %self.path.display(), product = %config.product, "loaded configuration");
        Ok(config)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_overrides(config: &mut DeployConfig, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(start) = env(PORT_START_ENV) {
        config.ports.start = parse_port(PORT_START_ENV, &start)?;
    }
    if let Some(end) = env(PORT_END_ENV) {
        config.ports.end = parse_port(PORT_END_ENV, &end)?;
    }
    Ok(())
}

fn parse_port(var: &str, raw: &str) -> Result<u16> {
    raw.trim().parse().map_err(|_| {
        ConfigError::Invalid {
            field: var.to_string(),
            reason: format!("'{raw}' is not a port number"),
        }
        .into()
    })
}
