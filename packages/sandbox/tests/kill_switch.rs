// ABOUTME: Integration tests for the emergency kill switch state machine and termination sequence
// ABOUTME: Verifies single execution under concurrency, trigger thresholds, and best-effort shutdown

mod common;

use common::{FakeProcessTable, Harness, GB, TEST_MARKER};
use futures::future::join_all;
use std::time::Duration;
use warden_sandbox::{KillSwitchState, ProcessInfo, SecurityPolicy};

fn processes(count: u32) -> Vec<ProcessInfo> {
    (0..count)
        .map(|i| ProcessInfo::new(50_000 + i, format!("{}_{}", TEST_MARKER, i)))
        .collect()
}

#[tokio::test]
async fn test_concurrent_activation_runs_sequence_once() {
    let h = Harness::build(|_| {}, FakeProcessTable::marked(3));
    h.provision(SecurityPolicy::NoNetwork).await;
    h.provision(SecurityPolicy::Bridged).await;
    let switch = h.warden.kill_switch.clone();

    let reports = join_all((0..8).map(|_| {
        let switch = switch.clone();
        tokio::spawn(async move { switch.activate("manual").await })
    }))
    .await;

    let performed: Vec<_> = reports
        .into_iter()
        .map(|r| r.unwrap())
        .filter_map(|r| r)
        .collect();
    assert_eq!(performed.len(), 1);
    assert_eq!(switch.state(), KillSwitchState::Terminated);
    assert_eq!(h.audit.count("killswitch_activated"), 1);
    assert_eq!(h.audit.count("killswitch_completed"), 1);
    assert_eq!(h.processes.kills().len(), 3);
    assert_eq!(performed[0].environments_torn_down.len(), 2);
    assert!(h.runtime.container_names().is_empty());
}

#[tokio::test]
async fn test_process_ceiling_triggers_above_limit() {
    let h = Harness::new();
    let switch = &h.warden.kill_switch;

    assert!(!switch.monitor(&processes(5)).await);
    assert_eq!(switch.state(), KillSwitchState::Armed);

    assert!(switch.monitor(&processes(6)).await);
    assert_ne!(switch.state(), KillSwitchState::Armed);
    assert_eq!(h.audit.count("process_limit_exceeded"), 1);
}

#[tokio::test]
async fn test_resource_violation_triggers() {
    let h = Harness::new();
    let switch = &h.warden.kill_switch;

    h.sampler.set(0.75, GB);
    assert!(!switch.monitor(&[]).await);

    h.sampler.set(0.85, GB);
    assert!(switch.monitor(&[]).await);
    assert_eq!(switch.state(), KillSwitchState::Terminated);
    assert_eq!(
        switch.last_report().unwrap().reason,
        "resource_violation"
    );
    assert_eq!(h.warden.governor.violations().len(), 1);
}

#[tokio::test]
async fn test_tripped_switch_never_rearms() {
    let h = Harness::new();
    let switch = &h.warden.kill_switch;

    assert!(switch.activate("manual").await.is_some());
    h.sampler.set(0.01, 0);
    assert!(switch.monitor(&[]).await);
    assert!(switch.activate("again").await.is_none());
    assert_eq!(switch.state(), KillSwitchState::Terminated);
    assert_eq!(h.audit.count("killswitch_activated"), 1);
}

#[tokio::test]
async fn test_termination_sequence_covers_every_step() {
    let h = Harness::build(|_| {}, FakeProcessTable::marked(2));
    let bridged = h.provision(SecurityPolicy::Bridged).await;
    let sealed = h.provision(SecurityPolicy::NoNetwork).await;

    let temp_root = h.warden.settings.temp_root.clone();
    std::fs::write(temp_root.join("warden_test_scratch_dump.txt"), b"x").unwrap();
    std::fs::write(temp_root.join("unrelated.txt"), b"keep").unwrap();

    let report = h.warden.kill_switch.activate("manual").await.unwrap();

    assert_eq!(report.processes_killed, vec![40_000, 40_001]);
    assert!(h.processes.kills().iter().all(|pid| *pid != 1));

    let mut isolated = report.environments_isolated.clone();
    isolated.sort();
    let mut expected = vec![bridged.id.clone(), sealed.id.clone()];
    expected.sort();
    assert_eq!(isolated, expected);
    assert!(h.runtime.exec_argv().iter().any(|argv| argv[0] == "tc"));

    let mut torn_down = report.environments_torn_down.clone();
    torn_down.sort();
    assert_eq!(torn_down, expected);
    assert!(h.runtime.container_names().is_empty());

    // Teardown already removed the per-environment scratch dirs
    assert_eq!(report.temp_entries_removed, 1);
    assert!(!temp_root.join("warden_test_scratch_dump.txt").exists());
    assert!(temp_root.join("unrelated.txt").exists());
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.snapshots.is_empty());
}

#[tokio::test]
async fn test_failed_step_does_not_stop_sequence() {
    let h = Harness::new();
    let stuck = h.provision(SecurityPolicy::NoNetwork).await;
    let healthy = h.provision(SecurityPolicy::NoNetwork).await;
    h.runtime.fail_removal_of(&h.container(&stuck.id));

    let report = h.warden.kill_switch.activate("manual").await.unwrap();

    assert_eq!(report.environments_torn_down, vec![healthy.id.clone()]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(&stuck.id));
    assert_eq!(h.warden.kill_switch.state(), KillSwitchState::Terminated);
    assert_eq!(h.audit.count("cleanup_error"), 1);
}

#[tokio::test]
async fn test_runtime_outage_still_cleans_host_side() {
    let h = Harness::build(|_| {}, FakeProcessTable::marked(1));
    h.provision(SecurityPolicy::NoNetwork).await;
    h.runtime.set_unavailable(true);

    let report = h.warden.kill_switch.activate("manual").await.unwrap();

    assert_eq!(report.processes_killed.len(), 1);
    assert!(!report.errors.is_empty());
    assert_eq!(report.temp_entries_removed, 1);
    assert_eq!(h.warden.kill_switch.state(), KillSwitchState::Terminated);
}

#[tokio::test]
async fn test_optional_snapshot_before_teardown() {
    let h = Harness::build(
        |s| s.snapshot_before_termination = true,
        FakeProcessTable::marked(0),
    );
    let env = h.provision(SecurityPolicy::NoNetwork).await;
    h.runtime
        .write_file(&h.container(&env.id), "/workspace/evidence.log", b"last words");

    let report = h.warden.kill_switch.activate("manual").await.unwrap();

    assert_eq!(report.snapshots.len(), 1);
    assert!(report.snapshots[0].exists());
    let kept = h.warden.snapshots.list_snapshots(&env.id).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert!(h.runtime.container_names().is_empty());
}

#[tokio::test]
async fn test_watchdog_stops_after_tripping() {
    let h = Harness::build(|_| {}, FakeProcessTable::marked(6));
    let handle = h
        .warden
        .kill_switch
        .spawn_watchdog(Duration::from_millis(20));

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("watchdog should exit once tripped")
        .unwrap();
    assert_eq!(h.warden.kill_switch.state(), KillSwitchState::Terminated);
    assert_eq!(h.processes.kills().len(), 6);
}

#[tokio::test]
async fn test_cancelled_activation_still_finishes_termination() {
    let h = Harness::build(|_| {}, FakeProcessTable::marked(1));
    h.provision(SecurityPolicy::NoNetwork).await;
    h.provision(SecurityPolicy::Bridged).await;
    h.processes.set_list_delay(Duration::from_millis(300));
    let switch = h.warden.kill_switch.clone();

    let first = tokio::time::timeout(Duration::from_millis(50), switch.activate("manual")).await;
    assert!(first.is_err(), "activation should still be running");
    assert_eq!(switch.state(), KillSwitchState::Triggered);

    tokio::time::timeout(Duration::from_secs(5), async {
        while switch.state() != KillSwitchState::Terminated {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("termination should finish without its caller");

    assert!(h.runtime.container_names().is_empty());
    assert_eq!(h.processes.kills(), vec![40_000]);
    assert_eq!(switch.last_report().unwrap().reason, "manual");
    assert!(switch.activate("retry").await.is_none());
    assert_eq!(h.audit.count("killswitch_completed"), 1);
}
