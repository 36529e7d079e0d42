//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: local process execution,
//! the SSH gateway, and configuration loading.
//!
//! Imports from `crate::domain` and `crate::application` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod clock;
pub mod command_runner;
pub mod config;
pub mod gateway;
