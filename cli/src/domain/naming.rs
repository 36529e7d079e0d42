//! Naming conventions shared with the proxy and the container runtime.
//!
//! These strings are matched by name on the remote hosts, so they must stay
//! stable across releases.

use chrono::{DateTime, Utc};

/// `{product}-{environment}-{unix_timestamp}`.
#[must_use]
pub fn instance_name(product: &str, environment: &str, now: DateTime<Utc>) -> String {
    format!("{product}-{environment}-{}", now.timestamp())
}

/// Prefix shared by every instance of one product+environment.
#[must_use]
pub fn instance_prefix(product: &str, environment: &str) -> String {
    format!("{product}-{environment}-")
}

/// `true` if `name` is an instance of this product+environment
/// (prefix followed by a unix timestamp only).
#[must_use]
pub fn is_instance_of(name: &str, product: &str, environment: &str) -> bool {
    name.strip_prefix(&instance_prefix(product, environment))
        .is_some_and(|ts| !ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit()))
}

/// `{product}_{environment}_backend` with hyphens turned into underscores.
#[must_use]
pub fn backend_name(product: &str, environment: &str) -> String {
    format!("{product}_{environment}_backend").replace('-', "_")
}

/// `{product}-{environment}.conf`, used for both site and upstream documents.
#[must_use]
pub fn config_file_name(product: &str, environment: &str) -> String {
    format!("{product}-{environment}.conf")
}

/// Release directory name: sortable UTC timestamp.
#[must_use]
pub fn release_name(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Layout of a static environment under the deploy root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePaths {
    pub root: String,
}

impl ReleasePaths {
    #[must_use]
    pub fn new(deploy_root: &str, environment: &str) -> Self {
        Self {
            root: format!("{}/{environment}", deploy_root.trim_end_matches('/')),
        }
    }

    #[must_use]
    pub fn releases(&self) -> String {
        format!("{}/releases", self.root)
    }

    #[must_use]
    pub fn release(&self, name: &str) -> String {
        format!("{}/releases/{name}", self.root)
    }

    #[must_use]
    pub fn current(&self) -> String {
        format!("{}/current", self.root)
    }

    #[must_use]
    pub fn shared(&self) -> String {
        format!("{}/shared", self.root)
    }
}
