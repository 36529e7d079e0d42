//! Multi-environment runs: locking, isolation of failures, the report.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use tandem_cli::application::services::deploy_run::{RunOptions, deploy_environments};
use tandem_cli::domain::{DeployConfig, DeployKind};

use crate::mocks::{FakeRemote, FixedClock, RecordingReporter, SITE, ScriptedCandidates, config, live_site};

fn opts() -> RunOptions {
    RunOptions {
        auto_rollback: true,
        registry_password: None,
        health_deadline: None,
        lock_owner: "ci@runner:77".to_string(),
    }
}

fn names(config: &DeployConfig) -> Vec<String> {
    config.environment_names()
}

fn lock_dirs(remote: &FakeRemote) -> usize {
    remote.snapshot(|w| {
        w.system
            .dirs
            .iter()
            .filter(|d| d.starts_with("/var/lock/tandem/"))
            .count()
    })
}

#[tokio::test]
async fn test_all_environments_run_even_after_a_failure() {
    let config = config();
    // No artifact staged: `docs` fails, `prod` must still deploy.
    let remote = FakeRemote::new();
    let mut candidates = ScriptedCandidates::new(&[30100]);

    let outcome = deploy_environments(
        &remote,
        &FixedClock::at(1_700_000_000),
        &RecordingReporter::default(),
        &mut candidates,
        &config,
        &names(&config),
        &opts(),
    )
    .await;

    let report = &outcome.report;
    assert_eq!(report.environments.len(), 2);
    let docs = &report.environments[0];
    assert_eq!(docs.environment, "docs");
    assert_eq!(docs.kind, Some(DeployKind::Static));
    assert!(!docs.ok);
    assert!(docs.error.as_deref().unwrap().contains("no build artifact found"));
    assert!(!docs.critical);

    let prod = &report.environments[1];
    assert!(prod.ok, "prod failed: {:?}", prod.error);
    assert_eq!(prod.instance.as_deref(), Some("shop-prod-1700000000"));
    assert_eq!(prod.port, Some(30100));
    assert_eq!(prod.health_verified, Some(true));

    assert!(!report.succeeded());
    assert_eq!(report.failed().len(), 1);
    assert!(outcome.reclaims.is_empty(), "first deployment replaces nothing");
    assert_eq!(lock_dirs(&remote), 0, "every lock is released");
}

#[tokio::test]
async fn test_locked_environment_is_skipped_untouched() {
    let config = config();
    let remote = FakeRemote::new().with(|w| {
        w.system.dirs.insert("/var/lock/tandem/shop-prod.lock".to_string());
        w.system.files.insert(
            "/var/lock/tandem/shop-prod.lock/owner".to_string(),
            "alice@laptop:4242 1700000000\n".to_string(),
        );
    });
    let mut candidates = ScriptedCandidates::new(&[30100]);

    let outcome = deploy_environments(
        &remote,
        &FixedClock::at(1_700_000_000),
        &RecordingReporter::default(),
        &mut candidates,
        &config,
        &["prod".to_string()],
        &opts(),
    )
    .await;

    let prod = &outcome.report.environments[0];
    assert!(!prod.ok);
    assert!(prod.error.as_deref().unwrap().contains("locked by another deploy (alice@laptop:4242"));
    assert!(remote.container_names().is_empty());
    assert_eq!(lock_dirs(&remote), 1, "someone else's lock stays");
}

#[tokio::test]
async fn test_unknown_environment_is_reported_not_panicked() {
    let config = config();
    let remote = FakeRemote::new();

    let outcome = deploy_environments(
        &remote,
        &FixedClock::at(1_700_000_000),
        &RecordingReporter::default(),
        &mut ScriptedCandidates::new(&[]),
        &config,
        &["staging".to_string()],
        &opts(),
    )
    .await;

    let staging = &outcome.report.environments[0];
    assert_eq!(staging.kind, None);
    assert!(staging.error.as_deref().unwrap().contains("Configured: docs, prod"));
    assert_eq!(remote.snapshot(|w| w.calls.len()), 0);
}

#[tokio::test]
async fn test_critical_rollback_is_flagged_in_the_report() {
    let mut config = config();
    config
        .environments
        .get_mut("prod")
        .unwrap()
        .proxy_tuning
        .custom_directives = vec!["bogus_directive on;".to_string()];
    let remote = FakeRemote::new().with(|w| {
        w.reject_marker = Some("bogus_directive".to_string());
        w.system
            .files
            .insert(SITE.to_string(), format!("{}bogus_directive off;\n", live_site()));
    });

    let outcome = deploy_environments(
        &remote,
        &FixedClock::at(1_700_000_000),
        &RecordingReporter::default(),
        &mut ScriptedCandidates::new(&[30100]),
        &config,
        &["prod".to_string()],
        &opts(),
    )
    .await;

    let prod = &outcome.report.environments[0];
    assert!(!prod.ok);
    assert!(prod.critical);
    assert_eq!(lock_dirs(&remote), 0, "lock released even after a critical failure");
}

#[tokio::test]
async fn test_replaced_instances_come_back_as_reclaim_handles() {
    let config = config();
    let remote = FakeRemote::new().with_live_container("shop-prod-1690000000", 30001);

    let outcome = deploy_environments(
        &remote,
        &FixedClock::at(1_700_000_000),
        &RecordingReporter::default(),
        &mut ScriptedCandidates::new(&[30100]),
        &config,
        &["prod".to_string()],
        &opts(),
    )
    .await;

    let prod = &outcome.report.environments[0];
    assert_eq!(prod.previous_port, Some(30001));
    assert_eq!(prod.reclaiming, vec!["shop-prod-1690000000".to_string()]);
    assert_eq!(outcome.reclaims.len(), 1);
    for handle in outcome.reclaims {
        assert_eq!(handle.environment(), "prod");
        handle.finish().await.unwrap();
    }
}
