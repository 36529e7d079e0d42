//! Port allocator against a simulated application host.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use tandem_cli::application::services::port_allocator::{PROBES_PER_ROUND, pick};
use tandem_cli::domain::{DeployError, HostRole, PortRange};

use crate::mocks::{FakeRemote, ScriptedCandidates};

fn range(start: u16, end: u16, max_attempts: u32) -> PortRange {
    PortRange {
        start,
        end,
        max_attempts,
    }
}

fn probed_ports(remote: &FakeRemote) -> Vec<u16> {
    remote
        .scripts()
        .into_iter()
        .filter(|(role, _, script)| *role == HostRole::Application && script.starts_with("ss "))
        .map(|(_, label, _)| label.parse().unwrap())
        .collect()
}

#[tokio::test]
async fn test_pick_finds_the_only_free_port_and_skips_excluded() {
    let remote = FakeRemote::new().with(|w| {
        w.busy_ports.extend([30001, 30002, 30003, 30004, 30005, 30006]);
    });
    let mut candidates =
        ScriptedCandidates::new(&[30050, 30001, 30002, 30050, 30003, 30004, 30005, 30006, 30100]);

    let port = pick(&remote, range(30000, 32767, 50), &[30050], &mut candidates)
        .await
        .expect("30100 is free");

    assert_eq!(port, 30100);
    assert!(!probed_ports(&remote).contains(&30050), "excluded port is never probed");
}

#[tokio::test]
async fn test_pick_probes_a_round_per_batch_and_keeps_draw_order() {
    let remote = FakeRemote::new().with(|w| {
        w.busy_ports.extend([30010, 30011, 30012]);
    });
    let mut candidates = ScriptedCandidates::new(&[30010, 30011, 30012, 30014, 30013]);

    let port = pick(&remote, range(30000, 30999, 50), &[], &mut candidates)
        .await
        .unwrap();

    assert_eq!(port, 30014, "first free port in draw order wins");
    assert_eq!(remote.batches_on(HostRole::Application), 1);
    assert_eq!(probed_ports(&remote).len(), PROBES_PER_ROUND as usize);
}

#[tokio::test]
async fn test_pick_repeated_draws_use_up_the_round() {
    let remote = FakeRemote::new().with(|w| {
        w.busy_ports.insert(30010);
    });
    let mut candidates = ScriptedCandidates::new(&[30010, 30010, 30010, 30010, 30010, 30020]);

    let port = pick(&remote, range(30000, 30999, 50), &[], &mut candidates)
        .await
        .unwrap();

    assert_eq!(port, 30020);
    assert_eq!(remote.batches_on(HostRole::Application), 2);
    assert_eq!(probed_ports(&remote)[0], 30010);
    assert_eq!(candidates.drawn, 10);
}

#[tokio::test]
async fn test_pick_single_port_range_equal_to_exclude_is_not_found() {
    let remote = FakeRemote::new();
    let mut candidates = ScriptedCandidates::new(&[]);

    let err = pick(&remote, range(30500, 30500, 50), &[30500], &mut candidates)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DeployError>(),
        Some(DeployError::PortExhaustion { attempts: 0, .. })
    ));
    assert_eq!(remote.batches_on(HostRole::Application), 0, "nothing to probe");
    assert_eq!(candidates.drawn, 0);
}

#[tokio::test]
async fn test_pick_gives_up_after_attempt_budget() {
    let remote = FakeRemote::new().with(|w| w.busy_ports.extend(30000..=30009));
    let mut candidates = ScriptedCandidates::new(&[]);

    let err = pick(&remote, range(30000, 30009, 12), &[], &mut candidates)
        .await
        .unwrap_err();

    match err.downcast_ref::<DeployError>() {
        Some(DeployError::PortExhaustion { start, end, attempts }) => {
            assert_eq!((*start, *end, *attempts), (30000, 30009, 12));
        }
        other => panic!("expected PortExhaustion, got {other:?}"),
    }
    assert_eq!(candidates.drawn, 12);
    assert!(err.to_string().contains("widen ports.start/ports.end"));
}

#[tokio::test]
async fn test_pick_surfaces_probe_failure() {
    let remote = FakeRemote::new().with(|w| {
        w.forced
            .insert("30001".to_string(), (127, "bash: ss: command not found".to_string()));
    });
    let mut candidates = ScriptedCandidates::new(&[30001]);

    let err = pick(&remote, range(30000, 30999, 5), &[], &mut candidates)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("ss: command not found"));
}

proptest! {
    /// Whatever the draws, the result is in range, never excluded, never busy.
    #[test]
    fn prop_pick_respects_range_and_exclusion(
        draws in proptest::collection::vec(29990u16..30030, 0..40),
        exclude in 30000u16..30020,
        busy in proptest::collection::hash_set(30000u16..30020, 0..15),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let busy_ports = busy.clone();
        let remote = FakeRemote::new().with(move |w| w.busy_ports = busy_ports);
        let mut candidates = ScriptedCandidates::new(&draws);
        let picked = rt.block_on(pick(&remote, range(30000, 30019, 30), &[exclude], &mut candidates));

        if let Ok(port) = picked {
            prop_assert!((30000..=30019).contains(&port));
            prop_assert_ne!(port, exclude);
            prop_assert!(!busy.contains(&port));
        }
        prop_assert!(!probed_ports(&remote).contains(&exclude));
    }
}
