//! Tests for the orchestrator captain.
//!
//! Drives [`OrchestratorCaptain`] against an in-memory cluster: pods, jobs,
//! deployments, services and mule-based volume staging.

mod common;

use common::{FakeCluster, orchestrator_compass};
use noronha_bay::barrel::{Barrel, FileSpec};
use noronha_bay::captain::OrchestratorCaptain;
use noronha_bay::warehouse::LocalWarehouse;
use noronha_bay::{
    Captain, Cargo, Error, Handle, ImageSpec, LaunchSpec, SECTION_DEPL, SECTION_IDE,
    SECTION_TRAIN,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn captain(cluster: &Arc<FakeCluster>, section: &str) -> OrchestratorCaptain {
    OrchestratorCaptain::new(section, &orchestrator_compass(), cluster.clone())
        .await
        .unwrap()
}

fn prefixed(mut cargo: Cargo, section: &str) -> Cargo {
    cargo.set_prefix(section).unwrap();
    cargo
}

fn spec(name: &str, tag: &str, ports: &[&str]) -> LaunchSpec {
    let mut spec = LaunchSpec::new(ImageSpec::new("nha-proj", "iris", tag), name);
    spec.ports = ports.iter().map(|p| p.to_string()).collect();
    spec
}

// =============================================================================
// Construction Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_namespace_is_configuration_error() {
    let cluster = FakeCluster::new();
    cluster.state().namespace_exists = false;

    let result = OrchestratorCaptain::new(SECTION_IDE, &orchestrator_compass(), cluster.clone()).await;

    assert!(matches!(result, Err(Error::Configuration(msg)) if msg.contains("'nha'")));
}

#[tokio::test]
async fn test_missing_nfs_is_configuration_error() {
    let cluster = FakeCluster::new();
    let mut compass = orchestrator_compass();
    compass.captain.nfs = None;

    let result = OrchestratorCaptain::new(SECTION_IDE, &compass, cluster.clone()).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
}

// =============================================================================
// Run Tests
// =============================================================================

#[tokio::test]
async fn test_run_creates_pod_and_service() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_IDE).await;

    let handle = captain
        .run(&spec("nha-ide-iris", "latest", &["30088:8888"]), false)
        .await
        .unwrap();

    assert_eq!(handle, Handle::Pod("nha-ide-iris".to_string()));
    let state = cluster.state();
    let pod = state.object("pod", "nha-ide-iris").expect("pod must exist");
    assert_eq!(pod["spec"]["restartPolicy"], "Never");
    assert_eq!(pod["spec"]["containers"][0]["image"], "noronha/nha-proj-iris:latest");

    let svc = state.object("service", "nha-ide-iris").expect("service must exist");
    assert_eq!(svc["spec"]["type"], "NodePort");
    assert_eq!(svc["spec"]["ports"][0]["nodePort"], 30088);
}

#[tokio::test]
async fn test_run_without_ports_skips_service() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;

    captain.run(&spec("nha-train-iris-exp1", "latest", &[]), false).await.unwrap();

    assert_eq!(cluster.count("create service"), 0);
}

#[tokio::test]
async fn test_run_job_resolves_pod() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;
    let mut spec = spec("nha-train-iris-exp1", "latest", &[]);
    spec.is_job = true;

    let handle = captain.run(&spec, false).await.unwrap();

    assert_eq!(handle, Handle::Pod("nha-train-iris-exp1-x7k2p".to_string()));
    assert_eq!(
        cluster.state().object("job", "nha-train-iris-exp1").unwrap()["spec"]["backoffLimit"],
        0
    );
}

#[tokio::test]
async fn test_second_job_run_replaces_leftover_job() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;
    let mut spec = spec("nha-train-iris-exp1", "latest", &[]);
    spec.is_job = true;

    captain.run(&spec, false).await.unwrap();
    let handle = captain.run(&spec, false).await.unwrap();

    assert_eq!(handle, Handle::Pod("nha-train-iris-exp1-x7k2p".to_string()));
    assert_eq!(cluster.count("delete job"), 1, "leftover job removed once");
    assert_eq!(cluster.count("create job"), 2);
}

#[tokio::test]
async fn test_pod_run_leaves_jobs_alone() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;

    captain.run(&spec("nha-train-iris-exp1", "latest", &[]), false).await.unwrap();

    assert_eq!(cluster.count("get job"), 0);
    assert_eq!(cluster.count("delete job"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_times_out_when_pod_never_ready() {
    let cluster = FakeCluster::new();
    cluster.state().pods_ready = false;
    let mut captain = captain(&cluster, SECTION_TRAIN).await;

    let result = captain.run(&spec("nha-train-iris-exp1", "latest", &[]), false).await;

    assert!(matches!(result, Err(Error::Timeout { .. })), "got {result:?}");
}

#[tokio::test]
async fn test_foreground_run_follows_logs_until_exit() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;

    captain.run(&spec("nha-train-iris-exp1", "latest", &[]), true).await.unwrap();

    assert_eq!(cluster.count("stream_logs"), 1, "pod finished after one stream");
    assert!(!captain.interrupted());
}

#[tokio::test]
async fn test_run_replaces_old_pod() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_IDE).await;
    let spec = spec("nha-ide-iris", "latest", &[]);

    captain.run(&spec, false).await.unwrap();
    captain.run(&spec, false).await.unwrap();

    assert_eq!(cluster.count("delete pod"), 1);
    assert_eq!(cluster.count("create pod"), 2);
}

// =============================================================================
// Deploy Tests
// =============================================================================

#[tokio::test]
async fn test_deploy_twice_replaces_deployment() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_DEPL).await;

    captain.deploy(&spec("nha-depl-iris-prod", "v1", &["8080"]), 1).await.unwrap();
    let handle = captain
        .deploy(&spec("nha-depl-iris-prod", "v2", &["8080"]), 3)
        .await
        .unwrap();

    assert_eq!(handle, Handle::Deployment("nha-depl-iris-prod".to_string()));
    assert_eq!(cluster.count("create deployment"), 1);
    assert_eq!(cluster.count("replace deployment"), 1);

    let state = cluster.state();
    assert_eq!(state.names("deployment"), vec!["nha-depl-iris-prod"]);
    let depl = state.object("deployment", "nha-depl-iris-prod").unwrap();
    assert_eq!(depl["spec"]["replicas"], 3);
    assert_eq!(
        depl["spec"]["template"]["spec"]["containers"][0]["image"],
        "noronha/nha-proj-iris:v2"
    );
}

#[tokio::test]
async fn test_service_kept_when_ports_unchanged() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_DEPL).await;
    let spec = spec("nha-depl-iris-prod", "v1", &["30080:8080"]);

    captain.deploy(&spec, 1).await.unwrap();
    captain.deploy(&spec, 1).await.unwrap();

    assert_eq!(cluster.count("create service"), 1);
    assert_eq!(cluster.count("delete service"), 0);
}

#[tokio::test]
async fn test_service_recreated_when_node_port_changes() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_DEPL).await;

    captain.deploy(&spec("nha-depl-iris-prod", "v1", &["30080:8080"]), 1).await.unwrap();
    captain.deploy(&spec("nha-depl-iris-prod", "v1", &["30081:8080"]), 1).await.unwrap();

    assert_eq!(cluster.count("delete service"), 1);
    let state = cluster.state();
    let svc = state.object("service", "nha-depl-iris-prod").unwrap();
    assert_eq!(svc["spec"]["ports"][0]["nodePort"], 30081);
}

#[tokio::test]
async fn test_dispose_deploy_removes_service() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_DEPL).await;
    captain.deploy(&spec("nha-depl-iris-prod", "v1", &["8080"]), 1).await.unwrap();

    assert!(captain.dispose_deploy("nha-depl-iris-prod", false).await.unwrap());

    let state = cluster.state();
    assert!(!state.has("deployment", "nha-depl-iris-prod"));
    assert!(!state.has("service", "nha-depl-iris-prod"));
}

// =============================================================================
// Volume Tests
// =============================================================================

#[tokio::test]
async fn test_empty_cargo_claim_created_once() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_IDE).await;
    let data = prefixed(Cargo::empty("data-iris", "/data", 4096), SECTION_IDE);

    assert!(captain.load_vol(&data, None).await.unwrap());
    assert!(!captain.load_vol(&data, None).await.unwrap());

    assert_eq!(cluster.count("create persistentvolumeclaim"), 1);
    let state = cluster.state();
    let pvc = state.object("persistentvolumeclaim", "nha-ide-data-iris").unwrap();
    assert_eq!(pvc["spec"]["resources"]["requests"]["storage"], "4Gi");
}

#[tokio::test]
async fn test_mule_reused_within_session() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_IDE).await;
    let conf = prefixed(Cargo::conf("iris", "a: 1\n"), SECTION_IDE);
    let meta = prefixed(
        Cargo::meta("iris", vec![("proj.json".into(), "{}".into())]),
        SECTION_IDE,
    );

    captain.load_vol(&conf, Some("nha-ide-iris")).await.unwrap();
    captain.load_vol(&meta, Some("nha-ide-iris")).await.unwrap();

    assert_eq!(cluster.count("create pod"), 1, "one mule per session");
    assert_eq!(captain.mule(), Some("nha-ide-iris-mule"));
    assert!(
        cluster
            .state()
            .copied
            .contains(&("nha-ide-iris-mule".into(), "/staging/nha-ide-conf-iris/nha.yaml".into()))
    );

    captain.close().await.unwrap();
    assert!(!cluster.state().has("pod", "nha-ide-iris-mule"));
    assert_eq!(captain.mule(), None);
}

#[tokio::test]
async fn test_load_vol_failure_removes_volume() {
    let cluster = FakeCluster::new();
    cluster.fail_on("copy_to");
    let mut captain = captain(&cluster, SECTION_IDE).await;
    let conf = prefixed(Cargo::conf("iris", "a: 1\n"), SECTION_IDE);

    let result = captain.load_vol(&conf, Some("x")).await;

    assert!(matches!(&result, Err(Error::Backend { operation, .. }) if operation == "copy_to"));
    let removal = vec![
        "rm".to_string(),
        "-rf".to_string(),
        "/staging/nha-ide-conf-iris".to_string(),
    ];
    assert!(
        cluster.state().execs.contains(&("x-mule".to_string(), removal)),
        "volume directory must be removed"
    );
}

#[tokio::test]
async fn test_heavy_cargo_deploys_inside_mule() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_TRAIN).await;
    let tmp = TempDir::new().unwrap();
    let warehouse = Arc::new(
        LocalWarehouse::with_path(tmp.path().to_path_buf())
            .unwrap()
            .with_public_url("http://warehouse:8080"),
    );
    let barrel = Barrel::dataset("iris", "v1", vec![FileSpec::new("a.csv")], false, warehouse);
    let dataset = prefixed(Cargo::dataset("iris", "v1", Arc::new(barrel)), SECTION_TRAIN);

    captain.load_vol(&dataset, Some("nha-train-iris-exp1")).await.unwrap();

    let state = cluster.state();
    assert!(state.copied.is_empty(), "heavy content is never copied");
    let curl = vec![
        "curl".to_string(),
        "-f".to_string(),
        "-O".to_string(),
        "http://warehouse:8080/datasets/iris/v1/a.csv".to_string(),
    ];
    assert!(state.execs.iter().any(|(_, argv)| *argv == curl), "got {:?}", state.execs);
}

#[tokio::test]
async fn test_forced_rm_vol_without_mule_is_skipped() {
    let cluster = FakeCluster::new();
    let mut captain = captain(&cluster, SECTION_IDE).await;
    let logs = prefixed(Cargo::logs("iris"), SECTION_IDE);

    assert!(!captain.rm_vol(&logs, true).await.unwrap());
    assert_eq!(cluster.count("exec"), 0);
}
