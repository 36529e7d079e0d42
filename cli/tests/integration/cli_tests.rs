//! Argument parsing, help and version output.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn tandem() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tandem"));
    cmd.env("NO_COLOR", "1").env_remove("TANDEM_CONFIG");
    cmd
}

// --- Help and version ---

#[test]
fn test_cli_no_args_shows_help() {
    // arg_required_else_help prints help on stderr and exits 2
    tandem().assert().code(2).stderr(predicate::str::contains(
        "Zero-downtime deployments across a proxy host and an application host",
    ));
}

#[test]
fn test_cli_help_lists_commands() {
    tandem()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_cli_version_flag_shows_version() {
    tandem()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(concat!("tandem ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_version_command_shows_version() {
    tandem()
        .arg("version")
        .assert()
        .success()
        .stdout(format!("tandem {}\n", env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_version_command_json_outputs_valid_json() {
    let output = tandem()
        .args(["version", "--json"])
        .output()
        .expect("run tandem");
    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_quiet_version_prints_nothing() {
    tandem()
        .args(["-q", "version"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// --- Argument validation ---

#[test]
fn test_deploy_requires_environment_or_all() {
    tandem()
        .arg("deploy")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("<ENVIRONMENT>"));
}

#[test]
fn test_deploy_environment_conflicts_with_all() {
    tandem()
        .args(["deploy", "prod", "--all"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_deploy_help_documents_rollback_switch() {
    tandem()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-rollback"))
        .stdout(predicate::str::contains("--health-timeout"))
        .stdout(predicate::str::contains("--all"));
}

#[test]
fn test_unknown_subcommand_fails() {
    tandem()
        .arg("rollout")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// --- Environment conventions ---

#[test]
fn test_no_color_accepts_any_value() {
    for value in ["1", "yes", "true", ""] {
        tandem()
            .env("NO_COLOR", value)
            .arg("version")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("tandem "));
    }
}

#[test]
fn test_no_color_flag_still_works_without_env() {
    tandem()
        .env_remove("NO_COLOR")
        .args(["--no-color", "version"])
        .assert()
        .success();
}

#[test]
fn test_deploy_health_timeout_is_bounded() {
    tandem()
        .args(["deploy", "prod", "--health-timeout", "18446744073709551615"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--health-timeout"));
    tandem()
        .args(["deploy", "prod", "--health-timeout", "0"])
        .assert()
        .code(2);
}
