//! Application services: use-case orchestration.
//!
//! Each service module implements a single use-case by composing domain logic
//! with port trait calls. Services import only from `crate::domain` and
//! `crate::application`; never from `crate::infra`, `crate::commands`, or
//! `crate::output`.

pub mod container_deploy;
pub mod deploy_run;
pub mod env_lock;
pub mod port_allocator;
pub mod proxy_publish;
pub mod reclaim;
pub mod remote;
pub mod static_deploy;
