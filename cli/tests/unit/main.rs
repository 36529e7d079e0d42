//! Unit tests for tandem
//!
//! Services run against an in-memory remote (see `mocks`), so these tests are
//! fast and need neither SSH nor docker.

mod container_deploy;
mod deploy_run;
mod port_allocator;
