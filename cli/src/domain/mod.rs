//! Domain layer: pure deployment logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod batch;
pub mod config;
pub mod docker;
pub mod error;
pub mod host;
pub mod lock;
pub mod naming;
pub mod proxy;
pub mod release;
pub mod shell;

pub use batch::{BatchJob, BatchResult, CommandOutcome, Framing, RemoteCommand};
pub use config::{DeployConfig, DeployKind, EnvironmentConfig, PortRange};
pub use error::{ConfigError, DeployError, GatewayError};
pub use host::{HostRole, HostTarget};
