//! Cluster orchestrator backend.
//!
//! One-shot units are pods (or jobs), replicated workloads are deployments.
//! Workloads with ports are exposed through a service named after them.
//!
//! Volumes live on an NFS server, one directory per cargo. The cluster has
//! no primitive to write into a volume directly, so a mule pod mounting the
//! NFS root is created lazily on the first staging and reused until
//! [`Captain::close`].
//!
//! ```text
//! NFS {path}/
//! ├── nha-train-logs-iris/        <- cargo volume
//! └── nha-train-shared-iris/      <- cargo volume
//!
//! mule pod: {path} mounted at /staging
//! ```

use super::manifest::{self, ContainerParams, ServicePort, Volumes};
use super::{Captain, Handle, Interrupt, LaunchSpec, mule_name, patient, split_commands};
use crate::cargo::{Cargo, CargoKind};
use crate::compass::{Compass, Healthcheck, NfsServer, ResourceProfile, ServiceType};
use crate::constants::{LOAD_BALANCER_GRACE, LOG_WATCH_ATTEMPTS, POLL_INTERVAL, STG_MOUNT};
use crate::error::{Error, Result};
use crate::workpath::Workpath;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const POD: &str = "pod";
const JOB: &str = "job";
const SERVICE: &str = "service";
const DEPLOYMENT: &str = "deployment";
const AUTOSCALER: &str = "horizontalpodautoscaler";
const CLAIM: &str = "persistentvolumeclaim";

/// Phase and readiness of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub name: String,
    pub phase: String,
    /// Every container reports ready.
    pub ready: bool,
}

impl PodStatus {
    /// Reads name, phase and readiness from a pod manifest.
    pub fn from_manifest(pod: &Value) -> Self {
        let statuses = pod["status"]["containerStatuses"].as_array();

        Self {
            name: pod["metadata"]["name"].as_str().unwrap_or_default().to_string(),
            phase: pod["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
            ready: statuses.is_some_and(|s| {
                !s.is_empty() && s.iter().all(|c| c["ready"].as_bool() == Some(true))
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

/// Cluster operations used by [`OrchestratorCaptain`], scoped to one
/// namespace.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn namespace_exists(&self) -> Result<bool>;

    /// Fetches an object; `None` if it does not exist.
    async fn get(&self, kind: &str, name: &str) -> Result<Option<Value>>;

    async fn create(&self, manifest: &Value) -> Result<()>;

    async fn replace(&self, manifest: &Value) -> Result<()>;

    /// Deletes an object immediately. Missing objects are not an error.
    async fn delete(&self, kind: &str, name: &str) -> Result<()>;

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodStatus>>;

    /// Runs one command in the pod's container of the same name.
    async fn exec(&self, pod: &str, cmd: &[String]) -> Result<String>;

    async fn copy_to(&self, src: &Path, pod: &str, dest: &str) -> Result<()>;

    /// Follows the container's logs until the stream ends.
    async fn stream_logs(&self, pod: &str, container: &str) -> Result<()>;
}

/// Captain over a cluster orchestrator.
pub struct OrchestratorCaptain {
    section: String,
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    timeout: Duration,
    resources: Option<ResourceProfile>,
    healthcheck: Healthcheck,
    nfs: NfsServer,
    storage_class: Option<String>,
    service_type: ServiceType,
    pull_secret: Option<String>,
    mule: Option<String>,
    interrupt: Interrupt,
    interrupted: bool,
}

impl OrchestratorCaptain {
    /// Creates a captain for `section`.
    ///
    /// # Errors
    ///
    /// Fails when the namespace or the NFS server is not configured, or the
    /// namespace does not exist in the cluster.
    pub async fn new(section: &str, compass: &Compass, cluster: Arc<dyn ClusterApi>) -> Result<Self> {
        let captain = Self {
            section: section.to_string(),
            namespace: compass.captain.namespace()?.to_string(),
            timeout: compass.captain.timeout(),
            resources: compass.captain.resource_profile(section)?,
            healthcheck: compass.captain.healthcheck.clone(),
            nfs: compass.captain.nfs(section)?,
            storage_class: compass.captain.storage_class.clone(),
            service_type: compass.captain.service_type,
            pull_secret: compass.docker.image_pull_secret.clone(),
            mule: None,
            interrupt: Interrupt::new(),
            interrupted: false,
            cluster,
        };

        captain.assert_namespace().await?;
        Ok(captain)
    }

    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
    }

    /// Name of the session's mule pod, if one was created.
    pub fn mule(&self) -> Option<&str> {
        self.mule.as_deref()
    }

    async fn assert_namespace(&self) -> Result<()> {
        let cluster = Arc::clone(&self.cluster);
        let what = format!("namespace '{}'", self.namespace);
        let exists = patient(self.timeout, &what, move || {
            let cluster = Arc::clone(&cluster);
            async move { cluster.namespace_exists().await }
        })
        .await?;

        if !exists {
            return Err(Error::Configuration(format!(
                "Namespace '{}' does not exist",
                self.namespace
            )));
        }
        Ok(())
    }

    /// Deletes, logging instead of failing when `force` is set.
    async fn remove(&self, kind: &str, name: &str, force: bool) -> Result<bool> {
        match self.cluster.delete(kind, name).await {
            Ok(()) => Ok(true),
            Err(e) if force => {
                debug!(kind = %kind, name = %name, error = %e, "Could not delete");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes a leftover pod (and job, for job runs) holding `name`.
    async fn make_name_available(&self, name: &str, is_job: bool) -> Result<()> {
        if is_job && self.cluster.get(JOB, name).await?.is_some() {
            warn!(job = %name, "Removing old job");
            self.remove(JOB, name, false).await?;
        }

        if self.cluster.get(POD, name).await?.is_some() {
            warn!(pod = %name, "Removing old pod");
            self.remove(POD, name, true).await?;
        }
        Ok(())
    }

    fn volumes(&self, spec: &LaunchSpec) -> Result<Volumes> {
        let mut volumes = manifest::kube_vols(&spec.cargos, &self.nfs);
        volumes.extend(manifest::kube_mounts(&spec.mounts, &self.nfs)?);
        Ok(volumes)
    }

    fn container_params(&self, spec: &LaunchSpec, volumes: Volumes, ports: Vec<Value>) -> ContainerParams {
        ContainerParams {
            name: spec.name.clone(),
            image: spec.img.target(),
            cmd: spec.cmd.clone(),
            env: spec.env_vars.clone(),
            resources: manifest::kube_resources(self.resources.as_ref()),
            volumes,
            ports,
            liveness: None,
            readiness: None,
        }
    }

    async fn find_pod_from_job(&self, job: &str) -> Result<String> {
        let cluster = Arc::clone(&self.cluster);
        let selector = format!("job-name={job}");
        let what = format!("pod of job '{job}'");

        patient(self.timeout, &what, move || {
            let cluster = Arc::clone(&cluster);
            let selector = selector.clone();
            async move {
                cluster
                    .list_pods(&selector)
                    .await?
                    .into_iter()
                    .next()
                    .map(|p| p.name)
                    .ok_or_else(|| Error::cluster("find pod of job", format!("no pod matches {selector}")))
            }
        })
        .await
    }

    /// Polls once per second until the pod runs with every container ready.
    async fn wait_for_pod(&self, name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut announced = false;

        loop {
            match self.cluster.get(POD, name).await {
                Ok(Some(pod)) => {
                    let status = PodStatus::from_manifest(&pod);
                    if status.is_running() && status.ready {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => debug!(pod = %name, error = %e, "Pod lookup failed"),
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: format!("waiting for pod '{name}' to start"),
                    duration: self.timeout,
                });
            }

            if !announced {
                info!(pod = %name, "Waiting up to {} seconds for pod to start", self.timeout.as_secs());
                announced = true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Follows the logs, retrying while the pod is still running.
    async fn watch_pod(&mut self, pod: &str, container: &str) -> Result<()> {
        let cluster = Arc::clone(&self.cluster);
        let interrupt = self.interrupt.clone();

        for _ in 0..LOG_WATCH_ATTEMPTS {
            tokio::select! {
                res = cluster.stream_logs(pod, container) => {
                    if let Err(e) = res {
                        debug!(pod = %pod, error = %e, "Log stream failed");
                    }

                    match cluster.get(POD, pod).await? {
                        Some(p) if PodStatus::from_manifest(&p).is_running() => {
                            debug!(pod = %pod, "Pod didn't finish, retrying to read logs");
                        }
                        _ => return Ok(()),
                    }
                }
                _ = interrupt.wait() => {
                    info!(pod = %pod, "Stopped watching pod");
                    self.interrupted = true;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn handle_svc(&self, name: &str, defs: &[ServicePort]) -> Result<()> {
        if defs.is_empty() {
            info!(service = %name, "Skipping service creation");
            return Ok(());
        }

        if let Some(current) = self.cluster.get(SERVICE, name).await? {
            let current_type = current["spec"]["type"].as_str().unwrap_or_default().to_string();
            let current_ports = manifest::parse_service_ports(&current["spec"]["ports"]);
            let type_changed = !current_type.eq_ignore_ascii_case(&self.service_type.to_string());

            if !type_changed && !manifest::check_port_change(&current_ports, defs) {
                info!(service = %name, "Skipping service re-creation since no changes were made");
                return Ok(());
            }

            info!(service = %name, "Removing old version of service");
            self.remove(SERVICE, name, true).await?;

            if current_type.eq_ignore_ascii_case("LoadBalancer") {
                tokio::time::sleep(LOAD_BALANCER_GRACE).await;
            }
        }

        let svc = manifest::service_manifest(name, self.service_type, defs);
        info!(service = %name, kind = %self.service_type, "Creating service");
        debug!(manifest = %svc, "Service manifest");
        self.cluster.create(&svc).await
    }

    async fn handle_autoscaler(&self, name: &str) {
        let Some(profile) = self.resources.as_ref().filter(|r| r.auto_scale) else {
            return;
        };

        if let Ok(Some(_)) = self.cluster.get(AUTOSCALER, name).await {
            debug!(autoscaler = %name, "Removing old autoscaler");
            let _ = self.remove(AUTOSCALER, name, true).await;
        }

        info!(autoscaler = %name, "Creating horizontal pod autoscaler");
        let hpa = manifest::autoscaler_manifest(name, &self.namespace, profile);

        if let Err(e) = self.cluster.create(&hpa).await {
            debug!(autoscaler = %name, error = %e, "Failed to create autoscaler");
        }
    }

    async fn assert_vol(&self, cargo: &Cargo) -> Result<bool> {
        let name = cargo.full_name();

        if self.cluster.get(CLAIM, &name).await?.is_some() {
            return Ok(false);
        }

        let pvc = manifest::pvc_manifest(&name, cargo.require_mb(), self.storage_class.as_deref());
        info!(claim = %name, "Creating persistent volume claim");
        debug!(manifest = %pvc, "Claim manifest");
        self.cluster.create(&pvc).await?;
        Ok(true)
    }

    async fn prepare_mule(&mut self, alias: Option<&str>) -> Result<String> {
        if let Some(mule) = &self.mule {
            return Ok(mule.clone());
        }

        let name = mule_name(alias);
        self.make_name_available(&name, false).await?;

        let pod = manifest::mule_manifest(&name, &self.nfs);
        debug!(pod = %name, "Creating auxiliary pod for handling volumes");
        self.cluster.create(&pod).await?;
        self.mule = Some(name.clone());

        self.wait_for_pod(&name).await?;
        Ok(name)
    }

    async fn exec_line(&self, pod: &str, line: &str) -> Result<()> {
        for argv in split_commands(line) {
            self.cluster.exec(pod, &argv).await?;
        }
        Ok(())
    }

    async fn clear_mule(&self, mule: &str, vol_path: &str) -> Result<()> {
        self.exec_line(mule, &format!("mkdir -p {vol_path}")).await?;
        let ls = self
            .cluster
            .exec(mule, &["ls".to_string(), vol_path.to_string()])
            .await?;

        for entry in ls.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.exec_line(mule, &format!("rm -rf {vol_path}/{entry}")).await?;
        }
        Ok(())
    }

    async fn stage(&mut self, cargo: &Cargo, mule_alias: Option<&str>, vol_path: &str) -> Result<()> {
        let mule = self.prepare_mule(mule_alias).await?;
        debug!(volume = %cargo.full_name(), "Creating volume");
        self.clear_mule(&mule, vol_path).await?;

        if !matches!(cargo.kind(), CargoKind::Heavy) {
            let work = Workpath::new()?;
            let copied = self.copy_work(cargo, &work, &mule, vol_path).await;

            if let Err(e) = work.dispose() {
                debug!(error = %e, "Failed to dispose work path");
            }
            copied?;
        }

        if cargo.stages_in_container() {
            for deployable in cargo.get_deployables(vol_path)? {
                info!("{}", deployable.message);
                self.exec_line(&mule, &deployable.command).await?;
            }
        }

        Ok(())
    }

    async fn copy_work(&self, cargo: &Cargo, work: &Workpath, mule: &str, vol_path: &str) -> Result<()> {
        cargo.deploy(work.path(), false)?;

        for entry in work.entries()? {
            let file_name = entry
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            self.cluster
                .copy_to(&entry, mule, &format!("{vol_path}/{file_name}"))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Captain for OrchestratorCaptain {
    fn section(&self) -> &str {
        &self.section
    }

    fn interrupted(&self) -> bool {
        self.interrupted
    }

    async fn run(&mut self, spec: &LaunchSpec, foreground: bool) -> Result<Handle> {
        for cargo in &spec.cargos {
            self.load_vol(cargo, Some(&spec.name)).await?;
        }

        self.make_name_available(&spec.name, spec.is_job).await?;
        let volumes = self.volumes(spec)?;
        let (port_refs, port_defs) =
            manifest::kube_svc_ports(&spec.name, &spec.ports, self.service_type)?;

        let container = manifest::container(&self.container_params(spec, volumes.clone(), port_refs));
        let pod_spec = manifest::run_pod_spec(container, &volumes, self.pull_secret.as_deref());

        let pod = if spec.is_job {
            info!(job = %spec.name, "Creating job");
            self.cluster.create(&manifest::job_manifest(&spec.name, pod_spec)).await?;
            self.find_pod_from_job(&spec.name).await?
        } else {
            info!(pod = %spec.name, "Creating pod");
            self.cluster.create(&manifest::pod_manifest(&spec.name, pod_spec)).await?;
            spec.name.clone()
        };

        self.handle_svc(&spec.name, &port_defs).await?;
        self.wait_for_pod(&pod).await?;

        if foreground {
            self.watch_pod(&pod, &spec.name).await?;
        }

        Ok(Handle::Pod(pod))
    }

    async fn deploy(&mut self, spec: &LaunchSpec, tasks: u32) -> Result<Handle> {
        for cargo in &spec.cargos {
            self.load_vol(cargo, Some(&spec.name)).await?;
        }

        let volumes = self.volumes(spec)?;
        let (port_refs, port_defs) =
            manifest::kube_svc_ports(&spec.name, &spec.ports, self.service_type)?;

        let mut params = self.container_params(spec, volumes.clone(), port_refs);
        params.liveness = manifest::liveness_probe(&self.healthcheck, spec.allow_probe);
        params.readiness = manifest::readiness_probe(spec.delay_readiness);

        let updated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let depl = manifest::deployment_manifest(
            &spec.name,
            tasks,
            manifest::container(&params),
            &volumes,
            self.pull_secret.as_deref(),
            &updated,
        );

        if self.cluster.get(DEPLOYMENT, &spec.name).await?.is_none() {
            info!(deployment = %spec.name, replicas = tasks, "Creating deployment");
            debug!(manifest = %depl, "Deployment manifest");
            self.cluster.create(&depl).await?;
        } else {
            info!(deployment = %spec.name, replicas = tasks, "Updating deployment");
            debug!(manifest = %depl, "Deployment manifest");
            self.cluster.replace(&depl).await?;
        }

        self.handle_svc(&spec.name, &port_defs).await?;
        self.handle_autoscaler(&spec.name).await;

        Ok(Handle::Deployment(spec.name.clone()))
    }

    async fn dispose_run(&mut self, name: &str, force: bool) -> Result<bool> {
        let job = self.remove(JOB, name, force).await?;
        let pod = self.remove(POD, name, force).await?;
        let svc = self.remove(SERVICE, name, force).await?;
        Ok(job && pod && svc)
    }

    async fn dispose_deploy(&mut self, name: &str, force: bool) -> Result<bool> {
        let depl = if force {
            self.remove(DEPLOYMENT, name, true).await?
        } else {
            let cluster = Arc::clone(&self.cluster);
            let target = name.to_string();
            let what = format!("removal of deployment '{name}'");

            patient(self.timeout, &what, move || {
                let cluster = Arc::clone(&cluster);
                let target = target.clone();
                async move { cluster.delete(DEPLOYMENT, &target).await }
            })
            .await?;
            true
        };

        let svc = self.remove(SERVICE, name, force).await?;
        Ok(depl && svc)
    }

    async fn rm_vol(&mut self, cargo: &Cargo, force: bool) -> Result<bool> {
        match cargo.kind() {
            CargoKind::Mapped { .. } => return Ok(false),
            CargoKind::Empty => return self.remove(CLAIM, &cargo.full_name(), force).await,
            _ => {}
        }

        let mule = match &self.mule {
            Some(mule) => mule.clone(),
            None if force => {
                warn!(volume = %cargo.full_name(), "Missing auxiliary pod for deletion of volume");
                return Ok(false);
            }
            None => self.prepare_mule(None).await?,
        };

        let vol_path = format!("{STG_MOUNT}/{}", cargo.full_name());
        let cmd = ["rm".to_string(), "-rf".to_string(), vol_path];

        match self.cluster.exec(&mule, &cmd).await {
            Ok(_) => Ok(true),
            Err(e) if force => {
                debug!(volume = %cargo.full_name(), error = %e, "Could not remove volume");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_vol(&mut self, cargo: &Cargo, mule_alias: Option<&str>) -> Result<bool> {
        match cargo.kind() {
            CargoKind::Empty => return self.assert_vol(cargo).await,
            CargoKind::Mapped { .. } => return Ok(false),
            _ => {}
        }

        let vol_path = format!("{STG_MOUNT}/{}", cargo.full_name());

        match self.stage(cargo, mule_alias, &vol_path).await {
            Ok(()) => Ok(true),
            Err(e) => {
                let _ = self.rm_vol(cargo, true).await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mule) = self.mule.take() {
            self.remove(POD, &mule, true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pod_status_ready_requires_all_containers() {
        let pod = json!({
            "metadata": {"name": "x"},
            "status": {
                "phase": "Running",
                "containerStatuses": [{"ready": true}, {"ready": false}],
            },
        });

        let status = PodStatus::from_manifest(&pod);
        assert!(status.is_running());
        assert!(!status.ready);
    }

    #[test]
    fn test_pod_status_missing_status() {
        let status = PodStatus::from_manifest(&json!({"metadata": {"name": "x"}}));
        assert_eq!(status.phase, "Unknown");
        assert!(!status.ready);
    }
}
