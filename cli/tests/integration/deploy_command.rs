//! Integration tests for `tandem deploy` failures that happen before any
//! host is contacted.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use predicates::prelude::*;
use tempfile::TempDir;

use crate::config_command::{CONFIG, tandem, write_config};

#[test]
fn test_unknown_environment_lists_configured_ones() {
    let (_dir, path) = write_config(CONFIG);
    tandem()
        .args(["deploy", "staging", "--config"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "unknown environment 'staging'. Configured: docs, prod",
        ));
}

#[test]
fn test_unknown_environment_json_error() {
    let (_dir, path) = write_config(CONFIG);
    let output = tandem()
        .args(["deploy", "staging", "--json", "--config"])
        .arg(&path)
        .output()
        .expect("run tandem");

    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(value["error"], true);
    assert!(
        value["message"]
            .as_str()
            .unwrap()
            .contains("unknown environment 'staging'")
    );
}

#[test]
fn test_deploy_without_config_file_fails() {
    let dir = TempDir::new().expect("temp dir");
    tandem()
        .args(["deploy", "prod"])
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("pass --config or set TANDEM_CONFIG"));
}

#[test]
fn test_deploy_rejects_invalid_config_before_connecting() {
    let (_dir, path) = write_config(&CONFIG.replace("start: 30000", "start: 80"));
    tandem()
        .args(["deploy", "--all", "--config"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config field 'ports' is invalid"));
}
