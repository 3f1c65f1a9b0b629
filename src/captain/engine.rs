//! Single-host engine backend.
//!
//! One-shot units are plain containers. Replicated workloads are swarm
//! services attached to the shared overlay network. Volumes are named
//! engine volumes, staged through a short-lived mule container that is
//! created and removed within each [`Captain::load_vol`] call.

use super::{Captain, Handle, Interrupt, LaunchSpec, mule_name, patient};
use crate::cargo::Cargo;
use crate::compass::{Compass, Healthcheck, Quota, ResourceProfile};
use crate::constants::{
    FORCE_UPDATE, HANG_CMD, HEALTH_URL, MULE_IMG, NETWORK, POLL_INTERVAL, STG_MOUNT,
};
use crate::error::{Error, Result};
use crate::workpath::Workpath;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Engine API
// =============================================================================

/// A container known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub running: bool,
}

/// A swarm service known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
}

/// Options for a detached container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<String>,
    /// `volume:path:mode` descriptors.
    pub volumes: Vec<String>,
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    pub gpu: bool,
}

impl RunOptions {
    /// A hanging helper container with `volume` mounted at the staging path.
    pub fn mule(name: &str, volume: &str) -> Self {
        Self {
            name: name.to_string(),
            image: MULE_IMG.to_string(),
            cmd: HANG_CMD.iter().map(|s| s.to_string()).collect(),
            volumes: vec![format!("{volume}:{STG_MOUNT}:rw")],
            ..Self::default()
        }
    }
}

/// Liveness probe of a service, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub cmd: String,
    pub interval: u64,
    pub timeout: u64,
    pub retries: u32,
    pub start_period: u64,
}

/// Options for creating or updating a swarm service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceOptions {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `volume:path:mode` descriptors.
    pub mounts: Vec<String>,
    /// `(published, target)` port pairs.
    pub published: Vec<(u16, u16)>,
    pub replicas: u32,
    pub network: String,
    pub force_update: u64,
    pub limits: Quota,
    pub reservations: Quota,
    pub gpu: bool,
    pub healthcheck: Option<HealthProbe>,
}

/// Container-engine operations used by [`EngineCaptain`].
#[async_trait]
pub trait EngineApi: Send + Sync {
    // -------------------------------------------------------------------------
    // Containers
    // -------------------------------------------------------------------------

    /// Finds a container by exact name.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Starts a detached container, returning its id.
    async fn run_container(&self, opts: &RunOptions) -> Result<String>;

    /// Force-removes a container.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Runs a command in a container, returning its stdout.
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<String>;

    /// Copies a local file or directory into a container.
    async fn copy_to(&self, src: &Path, container: &str, dest: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Volumes and networks
    // -------------------------------------------------------------------------

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Force-removes a volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    /// Creates an overlay network for swarm services.
    async fn create_network(&self, name: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    async fn find_service(&self, name: &str) -> Result<Option<ServiceInfo>>;

    async fn create_service(&self, opts: &ServiceOptions) -> Result<()>;

    async fn update_service(&self, opts: &ServiceOptions) -> Result<()>;

    async fn remove_service(&self, name: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    async fn build_image(&self, context: &Path, target: &str) -> Result<()>;

    async fn pull_image(&self, target: &str) -> Result<()>;

    async fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    async fn push_image(&self, target: &str) -> Result<()>;

    async fn remove_image(&self, target: &str) -> Result<()>;
}

// =============================================================================
// Engine Captain
// =============================================================================

/// Captain over a single-host container engine.
pub struct EngineCaptain {
    section: String,
    engine: Arc<dyn EngineApi>,
    timeout: Duration,
    resources: Option<ResourceProfile>,
    healthcheck: Healthcheck,
    interrupt: Interrupt,
    interrupted: bool,
}

impl EngineCaptain {
    /// Creates a captain for `section`.
    ///
    /// # Errors
    ///
    /// Fails if the section's resource profile is malformed.
    pub fn new(section: &str, compass: &Compass, engine: Arc<dyn EngineApi>) -> Result<Self> {
        Ok(Self {
            section: section.to_string(),
            engine,
            timeout: compass.captain.timeout(),
            resources: compass.captain.resource_profile(section)?,
            healthcheck: compass.captain.healthcheck.clone(),
            interrupt: Interrupt::new(),
            interrupted: false,
        })
    }

    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
    }

    async fn make_name_available(&self, name: &str) {
        if let Ok(Some(_)) = self.engine.find_container(name).await {
            warn!(container = %name, "Removing old container");
            self.rm_cont(name).await;
        }
    }

    async fn rm_cont(&self, name: &str) -> bool {
        match self.engine.remove_container(name).await {
            Ok(()) => true,
            Err(e) => {
                error!(container = %name, error = %e, "Failed to remove container");
                false
            }
        }
    }

    fn run_options(&self, spec: &LaunchSpec) -> RunOptions {
        let volumes = spec
            .mounts
            .iter()
            .cloned()
            .chain(spec.cargos.iter().map(Cargo::mount))
            .collect();

        RunOptions {
            name: spec.name.clone(),
            image: spec.img.target(),
            cmd: spec.cmd.clone(),
            env: spec.env_vars.clone(),
            ports: spec.ports.clone(),
            volumes,
            cpus: self.resources.as_ref().and_then(ResourceProfile::cpu),
            memory_mb: self.resources.as_ref().and_then(ResourceProfile::memory_mb),
            gpu: self.resources.as_ref().is_some_and(|r| r.enable_gpu),
        }
    }

    fn service_options(&self, spec: &LaunchSpec, tasks: u32) -> Result<ServiceOptions> {
        let mounts = spec
            .mounts
            .iter()
            .cloned()
            .chain(spec.cargos.iter().map(Cargo::mount))
            .collect();

        let healthcheck = (spec.allow_probe && self.healthcheck.enabled).then(|| HealthProbe {
            cmd: format!("curl -f {HEALTH_URL}"),
            interval: self.healthcheck.interval,
            timeout: self.healthcheck.timeout,
            retries: self.healthcheck.retries,
            start_period: self.healthcheck.start_period,
        });

        Ok(ServiceOptions {
            name: spec.name.clone(),
            image: spec.img.target(),
            cmd: spec.cmd.clone(),
            env: spec.env_vars.clone(),
            mounts,
            published: published_ports(&spec.ports)?,
            replicas: tasks,
            network: NETWORK.to_string(),
            force_update: FORCE_UPDATE,
            limits: self.resources.as_ref().map(|r| r.limits).unwrap_or_default(),
            reservations: self.resources.as_ref().map(|r| r.requests).unwrap_or_default(),
            gpu: self.resources.as_ref().is_some_and(|r| r.enable_gpu),
            healthcheck,
        })
    }

    async fn watch_container(&mut self, name: &str) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let interrupt = self.interrupt.clone();

        let poll = async {
            loop {
                match engine.find_container(name).await? {
                    Some(c) if c.running => tokio::time::sleep(POLL_INTERVAL).await,
                    _ => return Ok::<_, Error>(()),
                }
            }
        };

        tokio::select! {
            res = poll => res,
            _ = interrupt.wait() => {
                info!(container = %name, "Stopped watching container");
                self.interrupted = true;
                Ok(())
            }
        }
    }

    async fn assert_network(&self) -> Result<()> {
        if self.engine.network_exists(NETWORK).await? {
            return Ok(());
        }

        info!(network = %NETWORK, "Creating network");
        self.engine.create_network(NETWORK).await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        while tokio::time::Instant::now() < deadline {
            if self.engine.network_exists(NETWORK).await? {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(Error::Timeout {
            operation: format!("waiting for network '{NETWORK}'"),
            duration: self.timeout,
        })
    }

    /// Creates the volume if absent. Returns whether it was created.
    async fn assert_vol(&self, cargo: &Cargo) -> Result<bool> {
        let name = cargo.full_name();

        if self.engine.volume_exists(&name).await? {
            return Ok(false);
        }

        debug!(volume = %name, "Creating volume");
        self.engine.create_volume(&name).await?;
        Ok(true)
    }

    async fn stage(&self, cargo: &Cargo, mule: &str) -> Result<()> {
        self.engine
            .run_container(&RunOptions::mule(mule, &cargo.volume()))
            .await?;
        self.clear_mule(mule).await?;

        let work = Workpath::new()?;
        let copied = self.copy_work(cargo, &work, mule).await;

        if let Err(e) = work.dispose() {
            debug!(error = %e, "Failed to dispose work path");
        }

        copied
    }

    async fn copy_work(&self, cargo: &Cargo, work: &Workpath, mule: &str) -> Result<()> {
        cargo.deploy(work.path(), true)?;

        for entry in work.entries()? {
            self.engine.copy_to(&entry, mule, STG_MOUNT).await?;
        }

        Ok(())
    }

    async fn clear_mule(&self, mule: &str) -> Result<()> {
        let ls = self
            .engine
            .exec(mule, &["ls".to_string(), STG_MOUNT.to_string()])
            .await?;

        for file_name in ls.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let cmd = [
                "rm".to_string(),
                "-rf".to_string(),
                format!("{STG_MOUNT}/{file_name}"),
            ];
            self.engine.exec(mule, &cmd).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Captain for EngineCaptain {
    fn section(&self) -> &str {
        &self.section
    }

    fn interrupted(&self) -> bool {
        self.interrupted
    }

    async fn run(&mut self, spec: &LaunchSpec, foreground: bool) -> Result<Handle> {
        self.make_name_available(&spec.name).await;

        for cargo in &spec.cargos {
            self.load_vol(cargo, Some(&spec.name)).await?;
        }

        let opts = self.run_options(spec);
        info!(container = %spec.name, image = %opts.image, "Running container");
        self.engine.run_container(&opts).await?;

        if foreground {
            self.watch_container(&spec.name).await?;
        }

        Ok(Handle::Container(spec.name.clone()))
    }

    async fn deploy(&mut self, spec: &LaunchSpec, tasks: u32) -> Result<Handle> {
        for cargo in &spec.cargos {
            self.load_vol(cargo, Some(&spec.name)).await?;
        }

        self.assert_network().await?;
        let opts = self.service_options(spec, tasks)?;

        match self.engine.find_service(&spec.name).await? {
            None => {
                info!(service = %spec.name, replicas = tasks, "Creating service");
                debug!(?opts, "Service options");
                self.engine.create_service(&opts).await?;
            }
            Some(existing) => {
                info!(service = %spec.name, id = %existing.id, replicas = tasks, "Updating service");
                debug!(?opts, "Service options");
                self.engine.update_service(&opts).await?;
            }
        }

        Ok(Handle::Service(spec.name.clone()))
    }

    async fn dispose_run(&mut self, name: &str, force: bool) -> Result<bool> {
        let existing = match self.engine.find_container(name).await {
            Ok(existing) => existing,
            Err(e) if force => {
                error!(container = %name, error = %e, "Failed to look up container");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if existing.is_none() {
            return Ok(false);
        }

        match self.engine.remove_container(name).await {
            Ok(()) => Ok(true),
            Err(e) if force => {
                error!(container = %name, error = %e, "Failed to remove container");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn dispose_deploy(&mut self, name: &str, force: bool) -> Result<bool> {
        match self.engine.remove_service(name).await {
            Ok(()) => Ok(true),
            Err(e) if force => {
                error!(service = %name, error = %e, "Failed to remove service");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn rm_vol(&mut self, cargo: &Cargo, force: bool) -> Result<bool> {
        if cargo.is_mapped() {
            return Ok(false);
        }

        let name = cargo.full_name();

        if force {
            return match self.engine.remove_volume(&name).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    error!(volume = %name, error = %e, "Failed to remove volume");
                    Ok(false)
                }
            };
        }

        let engine = Arc::clone(&self.engine);
        let what = format!("removal of volume {name}");

        patient(self.timeout, &what, move || {
            let engine = Arc::clone(&engine);
            let name = name.clone();
            async move { engine.remove_volume(&name).await }
        })
        .await?;

        Ok(true)
    }

    async fn load_vol(&mut self, cargo: &Cargo, mule_alias: Option<&str>) -> Result<bool> {
        if !cargo.is_mapped() {
            self.assert_vol(cargo).await?;
        }

        if cargo.is_empty_kind() || cargo.contents().is_empty() {
            return Ok(false);
        }

        debug!(volume = %cargo.full_name(), "Loading volume");
        let mule = mule_name(mule_alias);
        let staged = self.stage(cargo, &mule).await;
        self.rm_cont(&mule).await;

        match staged {
            Ok(()) => Ok(true),
            Err(e) => {
                let _ = self.rm_vol(cargo, true).await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps only `host:container` pairs; bare ports need no publishing on
/// the overlay network.
fn published_ports(ports: &[String]) -> Result<Vec<(u16, u16)>> {
    let mut published = Vec::new();

    for port in ports {
        let Some((from, to)) = port.split_once(':') else {
            continue;
        };

        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| Error::Configuration(format!("invalid port mapping: {port}")))
        };
        published.push((parse(from)?, parse(to)?));
    }

    Ok(published)
}
