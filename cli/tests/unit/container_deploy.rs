//! Container cutover and rollback against simulated hosts.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use anyhow::Result;
use tandem_cli::application::services::container_deploy::{
    ContainerDeployed, ContainerTarget, DeployOptions, deploy_container,
};
use tandem_cli::domain::config::{DockerConfig, RegistryProvider};
use tandem_cli::domain::{DeployConfig, DeployError, HostRole};

use crate::mocks::{
    FakeRemote, FixedClock, Health, RecordingReporter, SITE, ScriptedCandidates, UPSTREAM, config,
    live_site, live_upstream,
};

const OLD: &str = "shop-prod-1690000000";
const NEW: &str = "shop-prod-1700000000";
const NOW: i64 = 1_700_000_000;
/// First round draws only 30100; the retry round starts with 30200.
const RACED_THEN_30200: [u16; 6] = [30100, 30100, 30100, 30100, 30100, 30200];

fn docker_mut(config: &mut DeployConfig) -> &mut DockerConfig {
    config
        .environments
        .get_mut("prod")
        .unwrap()
        .docker
        .as_mut()
        .unwrap()
}

fn rollback() -> DeployOptions {
    DeployOptions {
        auto_rollback: true,
        ..DeployOptions::default()
    }
}

async fn deploy(
    remote: &FakeRemote,
    config: &DeployConfig,
    reporter: &RecordingReporter,
    ports: &[u16],
    opts: &DeployOptions,
) -> Result<ContainerDeployed> {
    let env = config.environment("prod").unwrap();
    let target = ContainerTarget {
        config,
        environment: "prod",
        env,
        docker: env.docker.as_ref().unwrap(),
    };
    let mut candidates = ScriptedCandidates::new(ports);
    deploy_container(remote, &FixedClock::at(NOW), reporter, &mut candidates, &target, opts).await
}

fn deploy_error(err: &anyhow::Error) -> &DeployError {
    err.downcast_ref::<DeployError>()
        .unwrap_or_else(|| panic!("expected a DeployError, got: {err:#}"))
}

fn position(scripts: &[(HostRole, String, String)], needle: &str) -> usize {
    scripts
        .iter()
        .position(|(_, _, script)| script.contains(needle))
        .unwrap_or_else(|| panic!("no script containing {needle:?}"))
}

// ── Cutover ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_deploy_switches_traffic_then_reclaims_old_instance() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001);
    let reporter = RecordingReporter::default();

    let mut deployed = deploy(&remote, &config(), &reporter, &[30100], &rollback())
        .await
        .expect("deploy succeeds");

    assert_eq!(deployed.instance, NEW);
    assert_eq!(deployed.port, 30100);
    assert_eq!(deployed.previous_port, Some(30001));
    assert!(deployed.health_verified);
    assert_eq!(deployed.replaced, vec![OLD.to_string()]);
    assert!(deployed.warnings.is_empty());

    let upstream = remote.file(HostRole::System, UPSTREAM).unwrap();
    assert!(upstream.contains("upstream shop_prod_backend {"));
    assert!(upstream.contains("server 10.0.0.5:30100"));
    let site = remote.file(HostRole::System, SITE).unwrap();
    assert!(site.contains("server_name shop.example.com;"));
    assert!(site.contains("proxy_pass http://shop_prod_backend;"));
    assert_eq!(remote.snapshot(|w| w.reloads), 1);

    let report = deployed.reclaim.take().unwrap().finish().await.unwrap();
    assert_eq!(report.removed, vec![OLD.to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(remote.container_names(), vec![NEW.to_string()]);
}

#[tokio::test]
async fn test_detection_reads_both_hosts_before_anything_changes() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001);

    deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap();

    let calls = remote.snapshot(|w| w.calls.clone());
    assert_eq!(calls[0].0, HostRole::System);
    assert!(calls[0].1.iter().all(|c| c.script.contains("; cat ")));
    assert_eq!(calls[1].0, HostRole::Application);
    assert!(calls[1].1.iter().any(|c| c.label == "ps"));
}

#[tokio::test]
async fn test_old_instance_leaves_network_after_reload_and_before_stop() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001);

    let mut deployed = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap();
    deployed.reclaim.take().unwrap().finish().await.unwrap();

    let scripts = remote.scripts();
    let reload = position(&scripts, "nginx -s reload");
    let disconnect = position(&scripts, &format!("docker network disconnect 'tandem' '{OLD}'"));
    let alias = position(&scripts, "--alias 'shop-web'");
    let stop = position(&scripts, "docker stop");
    assert!(reload < disconnect, "old instance keeps the network until cutover");
    assert!(disconnect < alias, "alias moves only after the old holder left");
    assert!(alias < stop, "alias is moved before the old instance stops");
}

#[tokio::test]
async fn test_new_port_excludes_the_published_one() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001);

    let deployed = deploy(&remote, &config(), &RecordingReporter::default(), &[30001, 30002], &rollback())
        .await
        .unwrap();

    assert_eq!(deployed.port, 30002);
}

#[tokio::test(start_paused = true)]
async fn test_missing_health_check_proceeds_with_warning() {
    let remote = FakeRemote::new().with(|w| w.health = Health::NoCheck);
    let reporter = RecordingReporter::default();

    let deployed = deploy(&remote, &config(), &reporter, &[30100], &rollback())
        .await
        .unwrap();

    assert!(!deployed.health_verified);
    assert!(deployed.warnings[0].contains("readiness was not verified"));
    assert!(reporter.warnings().iter().any(|w| w.contains("no health check")));
    assert!(deployed.reclaim.is_none(), "first deployment has nothing to reclaim");
}

#[tokio::test(start_paused = true)]
async fn test_health_polls_until_healthy() {
    let remote = FakeRemote::new().with(|w| w.health = Health::HealthyAfter(2));

    let deployed = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap();

    assert!(deployed.health_verified);
    assert_eq!(remote.snapshot(|w| w.health_checks), 3);
}

// ── Starting ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bind_conflict_retries_once_on_a_fresh_port() {
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| {
            w.raced_ports.insert(30100);
        });
    let reporter = RecordingReporter::default();

    let deployed = deploy(&remote, &config(), &reporter, &RACED_THEN_30200, &rollback())
        .await
        .unwrap();

    assert_eq!(deployed.port, 30200);
    assert!(reporter.warnings().iter().any(|w| w.contains("port 30100 was taken")));
    let runs = remote
        .scripts()
        .into_iter()
        .filter(|(_, _, s)| s.starts_with("docker run"))
        .count();
    assert_eq!(runs, 2);
}

#[tokio::test]
async fn test_second_bind_conflict_is_fatal_and_leaves_old_instance_live() {
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| w.raced_ports.extend([30100, 30200]));

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &RACED_THEN_30200, &rollback())
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::BindConflict { port: 30200, .. }
    ));
    assert_eq!(remote.container_names(), vec![OLD.to_string()]);
    assert_eq!(remote.file(HostRole::System, UPSTREAM).unwrap(), live_upstream(30001));
}

#[tokio::test]
async fn test_missing_required_files_abort_before_any_change() {
    let mut config = config();
    docker_mut(&mut config).required_files = vec![".env".to_string(), "certs/ca.pem".to_string()];
    let remote = FakeRemote::new().with(|w| {
        w.app
            .files
            .insert("/srv/tandem/prod/.env".to_string(), "DB_URL=postgres://".to_string());
    });

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::MissingRequiredFiles { location, missing } => {
            assert_eq!(location, "deploy@10.0.0.5:/srv/tandem/prod");
            assert_eq!(missing, &vec!["certs/ca.pem".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!remote.scripts().iter().any(|(_, _, s)| s.starts_with("docker run")));
}

#[tokio::test]
async fn test_unreadable_live_config_aborts_before_any_change() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001).with(|w| {
        w.forced.insert(
            "site".to_string(),
            (1, format!("cat: {SITE}: Permission denied")),
        );
    });

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    assert!(matches!(deploy_error(&err), DeployError::RemoteStep { .. }));
    assert!(format!("{err:#}").contains("Permission denied"));
    assert!(!remote.scripts().iter().any(|(_, _, s)| s.starts_with("docker run")));
    assert_eq!(remote.file(HostRole::System, SITE).unwrap(), live_site());
}

#[tokio::test]
async fn test_registry_without_password_fails_before_pull() {
    let mut config = config();
    config.registry.provider = RegistryProvider::Ghcr;
    config.registry.password_env = Some("GHCR_TOKEN".to_string());
    let remote = FakeRemote::new();

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    assert!(matches!(deploy_error(&err), DeployError::RegistryLogin { .. }));
    assert!(err.to_string().contains("GHCR_TOKEN"));
    assert!(!remote.scripts().iter().any(|(_, _, s)| s.starts_with("docker pull")));
}

#[tokio::test]
async fn test_registry_login_failure_is_reported() {
    let mut config = config();
    config.registry.provider = RegistryProvider::Dockerhub;
    config.registry.username = Some("shopbot".to_string());
    let remote = FakeRemote::new().with(|w| {
        w.login_error = Some("Error response from daemon: unauthorized: incorrect username or password".to_string());
    });
    let opts = DeployOptions {
        registry_password: Some("s3cret".to_string()),
        ..rollback()
    };

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &opts)
        .await
        .unwrap_err();

    assert!(matches!(deploy_error(&err), DeployError::RegistryLogin { .. }));
    assert!(err.to_string().contains("unauthorized"));
    let login = remote
        .scripts()
        .into_iter()
        .find(|(_, label, _)| label == "login")
        .unwrap();
    assert!(login.2.contains("--password-stdin"));
}

// ── Rollback ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_health_timeout_rolls_back_and_keeps_upstream_byte_identical() {
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| w.health = Health::Starting);

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::HealthCheckTimeout {
            instance,
            attempts,
            last_status,
            remediation,
        } => {
            assert_eq!(instance, NEW);
            assert_eq!(*attempts, 3);
            assert_eq!(last_status, "starting");
            assert!(remediation.contains(&format!("previous instance {OLD}")));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(remote.file(HostRole::System, UPSTREAM).unwrap(), live_upstream(30001));
    assert_eq!(remote.file(HostRole::System, SITE).unwrap(), live_site());
    assert!(remote.proxy_test_passes());
    assert_eq!(remote.container_names(), vec![OLD.to_string()]);
    let scripts = remote.scripts();
    let removed = scripts
        .iter()
        .rposition(|(_, _, s)| s.starts_with(&format!("docker rm -f '{NEW}'")))
        .unwrap();
    let tested = position(&scripts, "nginx -t");
    assert!(removed < tested, "proxy test runs after the new instance is gone");
    assert_eq!(scripts[tested].0, HostRole::System);
}

#[tokio::test(start_paused = true)]
async fn test_health_timeout_rollback_with_failing_proxy_test_is_critical() {
    let remote = FakeRemote::new().with_live_container(OLD, 30001).with(|w| {
        w.health = Health::Starting;
        w.reject_marker = Some("bogus_directive".to_string());
        w.system
            .files
            .insert(SITE.to_string(), format!("{}bogus_directive off;\n", live_site()));
    });

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::CriticalRollbackFailure { output, files } => {
            assert!(output.contains("bogus_directive"));
            assert!(files.contains(SITE));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(remote.container_names(), vec![OLD.to_string()]);
    assert_eq!(remote.snapshot(|w| w.reloads), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_health_deadline_does_not_overflow() {
    let remote = FakeRemote::new().with(|w| w.health = Health::Starting);
    let opts = DeployOptions {
        health_deadline: Some(Duration::from_secs(u64::MAX)),
        ..rollback()
    };

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &opts)
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::HealthCheckTimeout { attempts: 3, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_huge_health_interval_stops_after_one_check() {
    let mut config = config();
    docker_mut(&mut config).health_interval_secs = u64::MAX / 4;
    let remote = FakeRemote::new().with(|w| w.health = Health::Starting);

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::HealthCheckTimeout { attempts: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_health_timeout_without_rollback_leaves_new_instance_unpublished() {
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| w.health = Health::Starting);
    let opts = DeployOptions::default();

    let err = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &opts)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Auto-rollback is off"));
    assert_eq!(remote.container_names(), vec![OLD.to_string(), NEW.to_string()]);
    assert_eq!(remote.file(HostRole::System, UPSTREAM).unwrap(), live_upstream(30001));
    assert_eq!(remote.snapshot(|w| w.reloads), 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_deadline_cuts_polling_short() {
    let mut config = config();
    docker_mut(&mut config).health_retries = 30;
    let remote = FakeRemote::new().with(|w| w.health = Health::Starting);
    let opts = DeployOptions {
        health_deadline: Some(Duration::from_secs(3)),
        ..rollback()
    };

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &opts)
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::HealthCheckTimeout { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn test_first_deploy_rejected_config_leaves_no_proxy_files() {
    let mut config = config();
    config
        .environments
        .get_mut("prod")
        .unwrap()
        .proxy_tuning
        .custom_directives = vec!["bogus_directive on;".to_string()];
    let remote = FakeRemote::new().with(|w| w.reject_marker = Some("bogus_directive".to_string()));

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::ConfigValidation { output, remediation } => {
            assert!(output.contains("unknown directive \"bogus_directive\""));
            assert!(remediation.contains("first deployment"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(remote.file(HostRole::System, SITE), None);
    assert_eq!(remote.file(HostRole::System, UPSTREAM), None);
    assert!(remote.proxy_test_passes());
    assert!(remote.container_names().is_empty());
}

#[tokio::test]
async fn test_rejected_config_restores_previous_documents() {
    let mut config = config();
    config
        .environments
        .get_mut("prod")
        .unwrap()
        .proxy_tuning
        .custom_directives = vec!["bogus_directive on;".to_string()];
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| w.reject_marker = Some("bogus_directive".to_string()));

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    assert!(matches!(deploy_error(&err), DeployError::ConfigValidation { .. }));
    assert!(err.to_string().contains("previous proxy configuration restored"));
    assert_eq!(remote.file(HostRole::System, UPSTREAM).unwrap(), live_upstream(30001));
    assert_eq!(remote.file(HostRole::System, SITE).unwrap(), live_site());
    assert_eq!(remote.snapshot(|w| w.reloads), 1, "one reload, after the restore");
    assert_eq!(remote.container_names(), vec![OLD.to_string()]);
    let staged = remote.snapshot(|w| w.system.files.keys().filter(|p| p.starts_with("/tmp/")).count());
    assert_eq!(staged, 0, "staging directory is cleaned up");
}

#[tokio::test]
async fn test_rollback_that_cannot_restore_a_valid_proxy_is_critical() {
    let mut config = config();
    config
        .environments
        .get_mut("prod")
        .unwrap()
        .proxy_tuning
        .custom_directives = vec!["bogus_directive on;".to_string()];
    let remote = FakeRemote::new().with_live_container(OLD, 30001).with(|w| {
        w.reject_marker = Some("bogus_directive".to_string());
        w.system
            .files
            .insert(SITE.to_string(), format!("{}bogus_directive off;\n", live_site()));
    });

    let err = deploy(&remote, &config, &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::CriticalRollbackFailure { files, .. } => {
            assert!(files.contains(SITE));
            assert!(files.contains(UPSTREAM));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().starts_with("CRITICAL"));
}

// ── Reclamation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reclaim_failures_are_reported_not_swallowed() {
    let remote = FakeRemote::new()
        .with_live_container(OLD, 30001)
        .with(|w| {
            w.stop_failures.insert(OLD.to_string());
        });

    let mut deployed = deploy(&remote, &config(), &RecordingReporter::default(), &[30100], &rollback())
        .await
        .unwrap();
    let handle = deployed.reclaim.take().unwrap();
    assert_eq!(handle.instances(), [OLD.to_string()]);
    let report = handle.finish().await.unwrap();

    assert!(report.removed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, OLD);
    assert!(report.failed[0].1.contains("cannot stop container"));
}
