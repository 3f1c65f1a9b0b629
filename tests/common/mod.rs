//! In-memory backends shared by the integration tests.
//!
//! Both fakes record every call as `"{operation} {target}"` and can be told
//! to fail a given operation.

#![allow(dead_code)]

use async_trait::async_trait;
use noronha_bay::captain::{
    ClusterApi, ContainerInfo, EngineApi, PodStatus, RunOptions, ServiceInfo, ServiceOptions,
};
use noronha_bay::{Compass, Error, HANG_CMD, Result};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

// =============================================================================
// Configuration
// =============================================================================

pub fn engine_compass() -> Compass {
    Compass::from_yaml_str(
        r#"
captain:
  type: swarm
  api_timeout: 5
"#,
    )
    .unwrap()
}

pub fn orchestrator_compass() -> Compass {
    Compass::from_yaml_str(
        r#"
captain:
  type: kube
  api_timeout: 5
  namespace: nha
  nfs:
    server: 10.0.0.2
    path: /shared
"#,
    )
    .unwrap()
}

// =============================================================================
// Fake Engine
// =============================================================================

#[derive(Debug, Default)]
pub struct EngineState {
    pub calls: Vec<String>,
    pub containers: BTreeMap<String, ContainerInfo>,
    pub volumes: BTreeSet<String>,
    pub networks: BTreeSet<String>,
    pub services: BTreeMap<String, ServiceOptions>,
    pub images: BTreeSet<String>,
    /// `(container, file name)` of every copy.
    pub copied: Vec<(String, String)>,
    /// Output of `ls` inside any container.
    pub ls_output: String,
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    /// Makes every later call of `operation` fail with a backend error.
    pub fn fail_on(&self, operation: &str) {
        self.state()
            .failures
            .insert(operation.to_string(), format!("{operation} refused"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls of `operation`.
    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation} ");
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record(&self, operation: &str, target: &str) -> Result<MutexGuard<'_, EngineState>> {
        let mut state = self.state();
        state.calls.push(format!("{operation} {target}"));

        if let Some(reason) = state.failures.get(operation) {
            return Err(Error::engine(operation, reason.clone()));
        }
        Ok(state)
    }
}

#[async_trait]
impl EngineApi for FakeEngine {
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let state = self.record("find_container", name)?;
        Ok(state.containers.get(name).cloned())
    }

    async fn run_container(&self, opts: &RunOptions) -> Result<String> {
        let mut state = self.record("run_container", &opts.name)?;

        if state.containers.contains_key(&opts.name) {
            return Err(Error::engine("run container", format!("name {} in use", opts.name)));
        }

        let hangs = opts.cmd.iter().map(String::as_str).eq(HANG_CMD.iter().copied());
        state.containers.insert(
            opts.name.clone(),
            ContainerInfo {
                name: opts.name.clone(),
                running: hangs,
            },
        );
        Ok(format!("id-{}", opts.name))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.record("remove_container", name)?;
        state.containers.remove(name);
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<String> {
        let state = self.record("exec", &format!("{name} {}", cmd.join(" ")))?;

        if cmd.first().map(String::as_str) == Some("ls") {
            return Ok(state.ls_output.clone());
        }
        Ok(String::new())
    }

    async fn copy_to(&self, src: &Path, container: &str, _dest: &str) -> Result<()> {
        let mut state = self.record("copy_to", container)?;
        let file_name = src
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        state.copied.push((container.to_string(), file_name));
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        let state = self.record("volume_exists", name)?;
        Ok(state.volumes.contains(name))
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let mut state = self.record("create_volume", name)?;
        state.volumes.insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.record("remove_volume", name)?;
        state.volumes.remove(name);
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let state = self.record("network_exists", name)?;
        Ok(state.networks.contains(name))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut state = self.record("create_network", name)?;
        state.networks.insert(name.to_string());
        Ok(())
    }

    async fn find_service(&self, name: &str) -> Result<Option<ServiceInfo>> {
        let state = self.record("find_service", name)?;
        Ok(state.services.get(name).map(|_| ServiceInfo {
            id: format!("svc-{name}"),
            name: name.to_string(),
        }))
    }

    async fn create_service(&self, opts: &ServiceOptions) -> Result<()> {
        let mut state = self.record("create_service", &opts.name)?;

        if state.services.contains_key(&opts.name) {
            return Err(Error::engine("create service", "name conflicts with an existing object"));
        }
        state.services.insert(opts.name.clone(), opts.clone());
        Ok(())
    }

    async fn update_service(&self, opts: &ServiceOptions) -> Result<()> {
        let mut state = self.record("update_service", &opts.name)?;

        if !state.services.contains_key(&opts.name) {
            return Err(Error::engine("update service", "no such service"));
        }
        state.services.insert(opts.name.clone(), opts.clone());
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        let mut state = self.record("remove_service", name)?;
        state.services.remove(name);
        Ok(())
    }

    async fn build_image(&self, _context: &Path, target: &str) -> Result<()> {
        let mut state = self.record("build_image", target)?;
        state.images.insert(target.to_string());
        Ok(())
    }

    async fn pull_image(&self, target: &str) -> Result<()> {
        let mut state = self.record("pull_image", target)?;
        state.images.insert(target.to_string());
        Ok(())
    }

    async fn tag_image(&self, _source: &str, target: &str) -> Result<()> {
        let mut state = self.record("tag_image", target)?;
        state.images.insert(target.to_string());
        Ok(())
    }

    async fn push_image(&self, target: &str) -> Result<()> {
        self.record("push_image", target).map(drop)
    }

    async fn remove_image(&self, target: &str) -> Result<()> {
        let mut state = self.record("remove_image", target)?;
        state.images.remove(target);
        Ok(())
    }
}

// =============================================================================
// Fake Cluster
// =============================================================================

#[derive(Debug)]
pub struct ClusterState {
    pub calls: Vec<String>,
    /// Objects by `(kind, name)`, kinds lowercased.
    pub objects: BTreeMap<(String, String), Value>,
    pub namespace_exists: bool,
    /// Whether new pods report ready.
    pub pods_ready: bool,
    /// `(pod, argv)` of every exec.
    pub execs: Vec<(String, Vec<String>)>,
    /// `(pod, dest)` of every copy.
    pub copied: Vec<(String, String)>,
    pub ls_output: String,
    pub failures: BTreeMap<String, String>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            objects: BTreeMap::new(),
            namespace_exists: true,
            pods_ready: true,
            execs: Vec::new(),
            copied: Vec::new(),
            ls_output: String::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl ClusterState {
    pub fn has(&self, kind: &str, name: &str) -> bool {
        self.objects.contains_key(&(kind.to_string(), name.to_string()))
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<&Value> {
        self.objects.get(&(kind.to_string(), name.to_string()))
    }

    /// Names of every stored object of `kind`.
    pub fn names(&self, kind: &str) -> Vec<String> {
        self.objects
            .keys()
            .filter(|(k, _)| k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

fn pod_status(ready: bool) -> Value {
    json!({
        "phase": if ready { "Running" } else { "Pending" },
        "containerStatuses": [{"ready": ready}],
    })
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    /// Makes every later call of `operation` fail with a backend error.
    ///
    /// Operations carrying a kind are named `"{verb} {kind}"`, e.g.
    /// `"create deployment"`.
    pub fn fail_on(&self, operation: &str) {
        self.state()
            .failures
            .insert(operation.to_string(), format!("{operation} refused"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation} ");
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record(&self, operation: &str, target: &str) -> Result<MutexGuard<'_, ClusterState>> {
        let mut state = self.state();
        state.calls.push(format!("{operation} {target}"));

        if let Some(reason) = state.failures.get(operation) {
            return Err(Error::cluster(operation, reason.clone()));
        }
        Ok(state)
    }
}

fn kind_and_name(manifest: &Value) -> (String, String) {
    (
        manifest["kind"].as_str().unwrap_or_default().to_lowercase(),
        manifest["metadata"]["name"].as_str().unwrap_or_default().to_string(),
    )
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn namespace_exists(&self) -> Result<bool> {
        let state = self.record("namespace_exists", "nha")?;
        Ok(state.namespace_exists)
    }

    async fn get(&self, kind: &str, name: &str) -> Result<Option<Value>> {
        let state = self.record(&format!("get {kind}"), name)?;
        Ok(state.object(kind, name).cloned())
    }

    async fn create(&self, manifest: &Value) -> Result<()> {
        let (kind, name) = kind_and_name(manifest);
        let mut state = self.record(&format!("create {kind}"), &name)?;

        if state.has(&kind, &name) {
            return Err(Error::cluster("create", format!("{kind} \"{name}\" already exists")));
        }

        let mut stored = manifest.clone();
        let ready = state.pods_ready;

        match kind.as_str() {
            "pod" => stored["status"] = pod_status(ready),
            "job" => {
                let pod_name = format!("{name}-x7k2p");
                let pod = json!({
                    "kind": "Pod",
                    "metadata": {"name": pod_name, "labels": {"job-name": name}},
                    "status": pod_status(ready),
                });
                state.objects.insert(("pod".to_string(), pod_name), pod);
            }
            _ => {}
        }

        state.objects.insert((kind, name), stored);
        Ok(())
    }

    async fn replace(&self, manifest: &Value) -> Result<()> {
        let (kind, name) = kind_and_name(manifest);
        let mut state = self.record(&format!("replace {kind}"), &name)?;

        if !state.has(&kind, &name) {
            return Err(Error::cluster("replace", format!("{kind} \"{name}\" not found")));
        }
        state.objects.insert((kind, name), manifest.clone());
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<()> {
        let mut state = self.record(&format!("delete {kind}"), name)?;
        state.objects.remove(&(kind.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodStatus>> {
        let state = self.record("list_pods", selector)?;
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));

        Ok(state
            .objects
            .iter()
            .filter(|((kind, _), pod)| kind == "pod" && pod["metadata"]["labels"][key] == value)
            .map(|(_, pod)| PodStatus::from_manifest(pod))
            .collect())
    }

    async fn exec(&self, pod: &str, cmd: &[String]) -> Result<String> {
        let mut state = self.record("exec", pod)?;
        state.execs.push((pod.to_string(), cmd.to_vec()));

        if cmd.first().map(String::as_str) == Some("ls") {
            return Ok(state.ls_output.clone());
        }
        Ok(String::new())
    }

    async fn copy_to(&self, _src: &Path, pod: &str, dest: &str) -> Result<()> {
        let mut state = self.record("copy_to", pod)?;
        state.copied.push((pod.to_string(), dest.to_string()));
        Ok(())
    }

    async fn stream_logs(&self, pod: &str, _container: &str) -> Result<()> {
        let mut state = self.record("stream_logs", pod)?;

        if let Some(stored) = state.objects.get_mut(&("pod".to_string(), pod.to_string())) {
            stored["status"]["phase"] = json!("Succeeded");
        }
        Ok(())
    }
}
