//! # Captain: backend adapters
//!
//! A captain translates one uniform launch request into calls against a
//! container backend. Two backends exist:
//!
//! - **Engine** ([`EngineCaptain`]): a single-host container engine. One-shot
//!   workloads are containers, replicated ones are swarm services.
//! - **Orchestrator** ([`OrchestratorCaptain`]): a cluster orchestrator.
//!   One-shot workloads are pods (or jobs), replicated ones are deployments
//!   exposed through services.
//!
//! ## Lifecycle of a unit
//!
//! ```text
//! absent ──load_vol(each cargo)──► provisioning ──run/deploy──► running
//!                                                                 │
//!                      ┌──────────────────────────────────────────┤
//!                      ▼                    ▼                     ▼
//!                  completed             failed               disposed
//! ```
//!
//! Re-deploying the same name updates the workload in place. Volume staging
//! is atomic per cargo: when any step fails the volume is removed and the
//! original error returned.
//!
//! ## Backend Selection
//!
//! [`get_captain`] resolves `captain.type` once and returns a [`Backend`],
//! a closed sum over both implementations.

mod docker;
pub mod engine;
mod kubectl;
pub mod manifest;
pub mod orchestrator;

pub use docker::DockerCli;
pub use engine::{ContainerInfo, EngineApi, EngineCaptain, RunOptions, ServiceInfo, ServiceOptions};
pub use kubectl::KubectlCli;
pub use orchestrator::{ClusterApi, OrchestratorCaptain, PodStatus};

use crate::cargo::Cargo;
use crate::compass::{BackendKind, Compass};
use crate::constants::{MULE_SUFFIX, POLL_INTERVAL};
use crate::error::Result;
use crate::image::ImageSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

// =============================================================================
// Launch Request
// =============================================================================

/// Everything a captain needs to launch one workload.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub img: ImageSpec,
    /// Unit name; also the mule alias for its volumes.
    pub name: String,
    pub env_vars: BTreeMap<String, String>,
    /// Extra `src:dest[:mode]` mounts.
    pub mounts: Vec<String>,
    pub cargos: Vec<Cargo>,
    /// `host:container` or bare `container` ports.
    pub ports: Vec<String>,
    pub cmd: Vec<String>,
    /// Attach a liveness probe when the healthcheck is enabled.
    pub allow_probe: bool,
    /// Seconds before the readiness probe starts; 0 disables it.
    pub delay_readiness: u32,
    /// Run as a job instead of a bare pod (orchestrator only).
    pub is_job: bool,
}

impl LaunchSpec {
    pub fn new(img: ImageSpec, name: impl Into<String>) -> Self {
        Self {
            img,
            name: name.into(),
            env_vars: BTreeMap::new(),
            mounts: Vec::new(),
            cargos: Vec::new(),
            ports: Vec::new(),
            cmd: Vec::new(),
            allow_probe: false,
            delay_readiness: 0,
            is_job: false,
        }
    }
}

/// What a launch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handle {
    Container(String),
    Service(String),
    Pod(String),
    Deployment(String),
}

impl Handle {
    pub fn name(&self) -> &str {
        match self {
            Handle::Container(n) | Handle::Service(n) | Handle::Pod(n) | Handle::Deployment(n) => n,
        }
    }
}

// =============================================================================
// Captain Contract
// =============================================================================

/// Uniform deployment contract over both backends.
///
/// A captain is bound to one section and is not shared across sections.
#[async_trait]
pub trait Captain: Send + Sync {
    /// Section this captain scopes its resources to.
    fn section(&self) -> &str;

    /// True once a foreground watch was cancelled by the operator.
    fn interrupted(&self) -> bool;

    /// Launches a single non-replicated unit, replacing any unit with the
    /// same name. In foreground mode, waits until the unit exits or the
    /// operator interrupts.
    async fn run(&mut self, spec: &LaunchSpec, foreground: bool) -> Result<Handle>;

    /// Launches or updates in place a replicated workload.
    async fn deploy(&mut self, spec: &LaunchSpec, tasks: u32) -> Result<Handle>;

    /// Removes a unit started by [`Captain::run`].
    ///
    /// With `force`, failures are logged and reported as `Ok(false)`.
    async fn dispose_run(&mut self, name: &str, force: bool) -> Result<bool>;

    /// Removes a workload started by [`Captain::deploy`].
    async fn dispose_deploy(&mut self, name: &str, force: bool) -> Result<bool>;

    /// Destroys the volume backing `cargo`.
    async fn rm_vol(&mut self, cargo: &Cargo, force: bool) -> Result<bool>;

    /// Ensures the volume exists and stages the cargo's contents into it.
    async fn load_vol(&mut self, cargo: &Cargo, mule_alias: Option<&str>) -> Result<bool>;

    /// Releases session-scoped helpers.
    async fn close(&mut self) -> Result<()>;
}

/// The configured backend.
pub enum Backend {
    Engine(EngineCaptain),
    Orchestrator(OrchestratorCaptain),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Engine(_) => BackendKind::Engine,
            Backend::Orchestrator(_) => BackendKind::Orchestrator,
        }
    }

    /// Replaces the interrupt source of the foreground watch.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        match self {
            Backend::Engine(c) => c.set_interrupt(interrupt),
            Backend::Orchestrator(c) => c.set_interrupt(interrupt),
        }
    }
}

#[async_trait]
impl Captain for Backend {
    fn section(&self) -> &str {
        match self {
            Backend::Engine(c) => c.section(),
            Backend::Orchestrator(c) => c.section(),
        }
    }

    fn interrupted(&self) -> bool {
        match self {
            Backend::Engine(c) => c.interrupted(),
            Backend::Orchestrator(c) => c.interrupted(),
        }
    }

    async fn run(&mut self, spec: &LaunchSpec, foreground: bool) -> Result<Handle> {
        match self {
            Backend::Engine(c) => c.run(spec, foreground).await,
            Backend::Orchestrator(c) => c.run(spec, foreground).await,
        }
    }

    async fn deploy(&mut self, spec: &LaunchSpec, tasks: u32) -> Result<Handle> {
        match self {
            Backend::Engine(c) => c.deploy(spec, tasks).await,
            Backend::Orchestrator(c) => c.deploy(spec, tasks).await,
        }
    }

    async fn dispose_run(&mut self, name: &str, force: bool) -> Result<bool> {
        match self {
            Backend::Engine(c) => c.dispose_run(name, force).await,
            Backend::Orchestrator(c) => c.dispose_run(name, force).await,
        }
    }

    async fn dispose_deploy(&mut self, name: &str, force: bool) -> Result<bool> {
        match self {
            Backend::Engine(c) => c.dispose_deploy(name, force).await,
            Backend::Orchestrator(c) => c.dispose_deploy(name, force).await,
        }
    }

    async fn rm_vol(&mut self, cargo: &Cargo, force: bool) -> Result<bool> {
        match self {
            Backend::Engine(c) => c.rm_vol(cargo, force).await,
            Backend::Orchestrator(c) => c.rm_vol(cargo, force).await,
        }
    }

    async fn load_vol(&mut self, cargo: &Cargo, mule_alias: Option<&str>) -> Result<bool> {
        match self {
            Backend::Engine(c) => c.load_vol(cargo, mule_alias).await,
            Backend::Orchestrator(c) => c.load_vol(cargo, mule_alias).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Backend::Engine(c) => c.close().await,
            Backend::Orchestrator(c) => c.close().await,
        }
    }
}

/// Builds the captain configured by `captain.type` for `section`.
///
/// # Errors
///
/// Unknown backend keys fail with a resolution error; the orchestrator
/// additionally requires an existing namespace.
pub async fn get_captain(section: &str, compass: &Compass) -> Result<Backend> {
    match compass.captain.backend()? {
        BackendKind::Engine => {
            let engine = Arc::new(DockerCli::new());
            Ok(Backend::Engine(EngineCaptain::new(section, compass, engine)?))
        }
        BackendKind::Orchestrator => {
            let cluster = Arc::new(KubectlCli::new(compass.captain.namespace()?));
            let captain = OrchestratorCaptain::new(section, compass, cluster).await?;
            Ok(Backend::Orchestrator(captain))
        }
    }
}

// =============================================================================
// Interrupt
// =============================================================================

/// Operator cancellation of a foreground watch.
///
/// Completes on Ctrl-C, or when [`Interrupt::trigger`] is called.
#[derive(Debug, Clone)]
pub struct Interrupt {
    notify: Arc<Notify>,
    listen_ctrl_c: bool,
}

impl Interrupt {
    /// Listens for Ctrl-C and programmatic triggers.
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            listen_ctrl_c: true,
        }
    }

    /// Only programmatic triggers.
    pub fn manual() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            listen_ctrl_c: false,
        }
    }

    /// Interrupts the current (or next) wait.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Resolves once the operator interrupts.
    pub async fn wait(&self) {
        if !self.listen_ctrl_c {
            self.notify.notified().await;
            return;
        }

        tokio::select! {
            _ = self.notify.notified() => {}
            res = tokio::signal::ctrl_c() => {
                // No signal handler available: only triggers can interrupt.
                if res.is_err() {
                    self.notify.notified().await;
                }
            }
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Retries `op` while it fails with a transient error, once per second,
/// for up to `timeout`. Returns the last error when time runs out.
pub async fn patient<T, F, Fut>(timeout: Duration, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut announced = false;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tokio::time::Instant::now() < deadline => {
                if !announced {
                    info!("Waiting up to {} seconds for {what}", timeout.as_secs());
                    announced = true;
                }
                debug!(error = %e, "Retrying {what}");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Name of a volume helper: `{alias}-mule`, with a random alias if none.
pub fn mule_name(alias: Option<&str>) -> String {
    match alias {
        Some(alias) => format!("{alias}-{MULE_SUFFIX}"),
        None => {
            let random = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{MULE_SUFFIX}", &random[..12])
        }
    }
}

/// Splits a shell line on `;` and `&&` into argument vectors.
pub fn split_commands(line: &str) -> Vec<Vec<String>> {
    line.split(';')
        .flat_map(|part| part.split("&&"))
        .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|argv| !argv.is_empty())
        .collect()
}
