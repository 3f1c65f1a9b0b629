//! Tests for the engine captain.
//!
//! Drives [`EngineCaptain`] against an in-memory engine to check volume
//! provisioning, staging rollback and update-in-place deploys.

mod common;

use common::{FakeEngine, engine_compass};
use noronha_bay::captain::EngineCaptain;
use noronha_bay::{
    Captain, Cargo, Error, Handle, ImageSpec, Interrupt, LaunchSpec, MountMode, SECTION_DEPL,
    SECTION_IDE,
};
use std::sync::Arc;

fn captain(engine: &Arc<FakeEngine>, section: &str) -> EngineCaptain {
    EngineCaptain::new(section, &engine_compass(), engine.clone()).unwrap()
}

fn prefixed(mut cargo: Cargo, section: &str) -> Cargo {
    cargo.set_prefix(section).unwrap();
    cargo
}

fn spec(name: &str, tag: &str) -> LaunchSpec {
    LaunchSpec::new(ImageSpec::new("nha-proj", "iris", tag), name)
}

// =============================================================================
// Volume Tests
// =============================================================================

#[tokio::test]
async fn test_load_vol_is_idempotent() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let logs = prefixed(Cargo::logs("iris"), SECTION_IDE);

    assert!(!captain.load_vol(&logs, Some("nha-ide-iris")).await.unwrap());
    assert!(!captain.load_vol(&logs, Some("nha-ide-iris")).await.unwrap());

    assert_eq!(engine.count("create_volume"), 1, "volume must be created once");
    assert_eq!(engine.count("volume_exists"), 2);
    assert!(engine.state().volumes.contains("nha-ide-logs-iris"));
}

#[tokio::test]
async fn test_load_vol_stages_through_mule() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let conf = prefixed(Cargo::conf("iris", "captain: {}\n"), SECTION_IDE);

    assert!(captain.load_vol(&conf, Some("nha-ide-iris")).await.unwrap());

    let state = engine.state();
    assert_eq!(
        state.copied,
        vec![("nha-ide-iris-mule".to_string(), "nha.yaml".to_string())]
    );
    assert!(state.containers.is_empty(), "mule must be removed after staging");
    assert!(state.volumes.contains("nha-ide-conf-iris"));
}

#[tokio::test]
async fn test_load_vol_clears_stale_files() {
    let engine = FakeEngine::new();
    engine.state().ls_output = "old.txt\nstale.csv\n".to_string();
    let mut captain = captain(&engine, SECTION_IDE);
    let conf = prefixed(Cargo::conf("iris", "a: 1\n"), SECTION_IDE);

    captain.load_vol(&conf, Some("x")).await.unwrap();

    let calls = engine.calls();
    assert!(calls.contains(&"exec x-mule rm -rf /staging/old.txt".to_string()));
    assert!(calls.contains(&"exec x-mule rm -rf /staging/stale.csv".to_string()));
}

#[tokio::test]
async fn test_load_vol_failure_removes_volume() {
    let engine = FakeEngine::new();
    engine.fail_on("copy_to");
    let mut captain = captain(&engine, SECTION_IDE);
    let conf = prefixed(Cargo::conf("iris", "a: 1\n"), SECTION_IDE);

    let result = captain.load_vol(&conf, Some("x")).await;

    assert!(
        matches!(&result, Err(Error::Backend { operation, .. }) if operation == "copy_to"),
        "original error must be returned, got {result:?}"
    );
    let state = engine.state();
    assert!(!state.volumes.contains("nha-ide-conf-iris"), "no orphaned volume");
    assert!(state.containers.is_empty(), "mule must be removed on failure");
}

#[tokio::test]
async fn test_rm_vol_mapped_is_noop() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let mapped = prefixed(Cargo::mapped("code", "/app", "/home/me/code", false), SECTION_IDE);

    assert!(!captain.rm_vol(&mapped, false).await.unwrap());
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rm_vol_waits_for_volume_release() {
    let engine = FakeEngine::new();
    engine.fail_on("remove_volume");
    let mut captain = captain(&engine, SECTION_IDE);
    let logs = prefixed(Cargo::logs("iris"), SECTION_IDE);

    let result = captain.rm_vol(&logs, false).await;

    assert!(matches!(result, Err(Error::Backend { .. })));
    assert!(engine.count("remove_volume") > 1, "removal must be retried");
}

#[test]
fn test_mount_descriptor() {
    let cargo = Cargo::new("ds-iris", "/data", MountMode::ReadOnly, Vec::new());
    assert_eq!(cargo.mount(), "ds-iris:/data:ro");
}

// =============================================================================
// Run Tests
// =============================================================================

#[tokio::test]
async fn test_run_replaces_existing_container() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let spec = spec("nha-ide-iris", "latest");

    captain.run(&spec, false).await.unwrap();
    let handle = captain.run(&spec, false).await.unwrap();

    assert_eq!(handle, Handle::Container("nha-ide-iris".to_string()));
    let calls = engine.calls();
    let removed = calls.iter().position(|c| c == "remove_container nha-ide-iris");
    let second_run = calls.iter().rposition(|c| c == "run_container nha-ide-iris");
    assert!(removed.unwrap() < second_run.unwrap(), "old container removed first");
}

#[tokio::test]
async fn test_run_mounts_cargos() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let mut spec = spec("nha-ide-iris", "latest");
    spec.cargos = vec![prefixed(Cargo::logs("iris"), SECTION_IDE)];

    captain.run(&spec, false).await.unwrap();

    let state = engine.state();
    assert!(state.volumes.contains("nha-ide-logs-iris"));
    assert!(state.containers.contains_key("nha-ide-iris"));
}

#[tokio::test(start_paused = true)]
async fn test_foreground_run_stops_on_interrupt() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    let interrupt = Interrupt::manual();
    captain.set_interrupt(interrupt.clone());

    let mut spec = spec("nha-ide-iris", "latest");
    spec.cmd = vec!["tail".into(), "-F".into(), "/dev/null".into()];

    interrupt.trigger();
    captain.run(&spec, true).await.unwrap();

    assert!(captain.interrupted(), "interrupt must be recorded, not raised");
}

#[tokio::test]
async fn test_dispose_run_force_swallows_errors() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_IDE);
    captain.run(&spec("nha-ide-iris", "latest"), false).await.unwrap();
    engine.fail_on("remove_container");

    assert!(!captain.dispose_run("nha-ide-iris", true).await.unwrap());
    assert!(captain.dispose_run("nha-ide-iris", false).await.is_err());
}

// =============================================================================
// Deploy Tests
// =============================================================================

#[tokio::test]
async fn test_deploy_twice_updates_in_place() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_DEPL);

    captain.deploy(&spec("nha-depl-iris-prod", "v1"), 1).await.unwrap();
    let handle = captain.deploy(&spec("nha-depl-iris-prod", "v2"), 3).await.unwrap();

    assert_eq!(handle, Handle::Service("nha-depl-iris-prod".to_string()));
    assert_eq!(engine.count("create_service"), 1);
    assert_eq!(engine.count("update_service"), 1);
    assert_eq!(engine.count("create_network"), 1, "network asserted once");

    let state = engine.state();
    assert_eq!(state.services.len(), 1, "exactly one logical workload");
    let service = &state.services["nha-depl-iris-prod"];
    assert_eq!(service.replicas, 3);
    assert_eq!(service.image, "noronha/nha-proj-iris:v2");
}

#[tokio::test]
async fn test_deploy_publishes_mapped_ports_only() {
    let engine = FakeEngine::new();
    let mut captain = captain(&engine, SECTION_DEPL);
    let mut spec = spec("nha-depl-iris-prod", "v1");
    spec.ports = vec!["30080:8080".to_string(), "9090".to_string()];

    captain.deploy(&spec, 1).await.unwrap();

    assert_eq!(engine.state().services["nha-depl-iris-prod"].published, vec![(30080, 8080)]);
}
