//! # Expedition: one launch transaction
//!
//! An expedition binds an image, the cargos a [`Mission`] declares and a
//! captain into a single `launch` call. Two failure policies exist:
//!
//! ```text
//! ShortExpedition (notebooks, trainings)
//!   run ──► close(completed)            close runs exactly once, errors logged
//!
//! LongExpedition (deployments, islands)
//!   deploy ──ok──► close                workload and volumes stay up
//!          └─err─► revert ──► close     workload and volumes removed,
//!                                       original error returned
//! ```
//!
//! Every cargo gets the mission's section as prefix at construction, so
//! volume names never collide across workload kinds.

mod missions;

pub use missions::{DeploymentMission, NotebookMission, TrainingMission};

use crate::captain::{Backend, Captain, Handle, LaunchSpec};
use crate::cargo::Cargo;
use crate::compass::Compass;
use crate::constants::{ENV_CONTAINER_PURPOSE, HANG_CMD};
use crate::error::{Error, Result};
use crate::image::ImageSpec;
use crate::logging::LogContext;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

// =============================================================================
// Mission
// =============================================================================

/// Identity and payload of one kind of workload.
///
/// Only the section and the alias are mandatory; every other hook has a
/// default matching a plain framework-built image.
pub trait Mission: Send + Sync {
    /// Section scoping the workload and its volumes.
    fn section(&self) -> &'static str;

    /// Workload name suffix.
    fn make_alias(&self) -> String;

    fn make_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(ENV_CONTAINER_PURPOSE.to_string(), self.section().to_string())])
    }

    /// Arguments for the image's entrypoint.
    fn make_cmd(&self, _debug: bool) -> Vec<String> {
        Vec::new()
    }

    fn make_ports(&self) -> Vec<String> {
        Vec::new()
    }

    /// Metadata documents shipped as `(file_name, text)`.
    fn documents(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Barrel-backed cargos merged into the shared volume.
    fn heavy_cargos(&self) -> Vec<Cargo> {
        Vec::new()
    }

    /// Whether a deploy may carry a liveness probe.
    fn allow_probe(&self) -> bool {
        false
    }

    /// Volumes of the workload: its logs plus one shared volume holding
    /// the configuration, the metadata and the heavy cargos.
    fn make_vols(&self, conf_dump: &str) -> Result<Vec<Cargo>> {
        let alias = self.make_alias();

        let mut merged = vec![
            Cargo::conf(&alias, conf_dump),
            Cargo::meta(&alias, self.documents()),
        ];
        merged.extend(self.heavy_cargos());

        Ok(vec![Cargo::logs(&alias), Cargo::shared(&alias, merged)?])
    }
}

// =============================================================================
// Launch Options
// =============================================================================

/// Caller-supplied launch parameters.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub env_vars: BTreeMap<String, String>,
    pub mounts: Vec<String>,
    pub ports: Vec<String>,
    /// Block until a one-shot run exits or the operator interrupts.
    pub foreground: bool,
    /// Replicas of a deploy.
    pub tasks: u32,
    pub allow_probe: bool,
    pub delay_readiness: u32,
    pub is_job: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            env_vars: BTreeMap::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            foreground: true,
            tasks: 1,
            allow_probe: false,
            delay_readiness: 0,
            is_job: false,
        }
    }
}

/// Merges caller variables into the required ones.
///
/// New caller keys are kept. A caller key that would change a required
/// value is rejected.
pub fn join_env(
    caller: &BTreeMap<String, String>,
    required: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut merged = required;

    for (key, value) in caller {
        match merged.get(key) {
            Some(current) if current != value => {
                return Err(Error::Misusage(format!(
                    "environment variable '{key}' is set by the framework and cannot be overwritten"
                )));
            }
            Some(_) => {}
            None => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(merged)
}

// =============================================================================
// Expedition
// =============================================================================

/// State shared by both launch policies.
pub struct Expedition<M: Mission> {
    mission: M,
    captain: Backend,
    img: ImageSpec,
    cargos: Vec<Cargo>,
    log: LogContext,
    mock: bool,
}

impl<M: Mission> Expedition<M> {
    /// Builds the cargos of `mission` and scopes them to its section.
    ///
    /// # Errors
    ///
    /// Fails when the captain serves another section, or when the cargos
    /// cannot be built.
    pub fn new(
        mission: M,
        img: ImageSpec,
        compass: &Compass,
        captain: Backend,
        log: LogContext,
    ) -> Result<Self> {
        let section = mission.section();

        if captain.section() != section {
            return Err(Error::Misusage(format!(
                "captain of section '{}' cannot launch a '{section}' workload",
                captain.section()
            )));
        }

        let mut cargos = mission.make_vols(&compass.dump()?)?;
        for cargo in &mut cargos {
            cargo.set_prefix(section)?;
        }

        Ok(Self {
            mission,
            captain,
            img,
            cargos,
            log,
            mock: compass.docker.mock,
        })
    }

    /// Workload name: `{section}-{alias}`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.mission.section(), self.mission.make_alias())
    }

    pub fn mission(&self) -> &M {
        &self.mission
    }

    pub fn img(&self) -> &ImageSpec {
        &self.img
    }

    pub fn cargos(&self) -> &[Cargo] {
        &self.cargos
    }

    pub fn captain(&self) -> &Backend {
        &self.captain
    }

    pub fn captain_mut(&mut self) -> &mut Backend {
        &mut self.captain
    }

    /// Resolves the launch request handed to the captain.
    pub fn launch_spec(&self, opts: &LaunchOptions) -> Result<LaunchSpec> {
        let mut spec = LaunchSpec::new(self.img.clone(), self.name());

        spec.env_vars = join_env(&opts.env_vars, self.mission.make_env_vars())?;
        spec.mounts = opts.mounts.clone();
        spec.cargos = self.cargos.clone();
        spec.ports = opts
            .ports
            .iter()
            .cloned()
            .chain(self.mission.make_ports())
            .collect();
        spec.cmd = if self.mock {
            HANG_CMD.iter().map(|s| s.to_string()).collect()
        } else {
            self.mission.make_cmd(self.log.debug_mode())
        };
        spec.allow_probe = opts.allow_probe || (self.mission.allow_probe() && !self.mock);
        spec.delay_readiness = opts.delay_readiness;
        spec.is_job = opts.is_job;

        Ok(spec)
    }

    /// Removes every cargo's volume. Failures are logged and the remaining
    /// cargos are still attempted.
    async fn remove_vols(&mut self, keep_logs: bool) {
        for cargo in &self.cargos {
            if cargo.is_logs() && keep_logs {
                debug!(volume = %cargo.full_name(), "Keeping logs from volume");
                continue;
            }

            if let Err(e) = self.captain.rm_vol(cargo, true).await {
                warn!(volume = %cargo.full_name(), error = %e, "Failed to remove volume");
            }
        }
    }

    async fn close_captain(&mut self) {
        if let Err(e) = self.captain.close().await {
            error!(section = %self.captain.section(), error = %e, "Failed to close captain");
        }
    }
}

// =============================================================================
// Short Expedition
// =============================================================================

/// One-shot launch with guaranteed cleanup.
pub struct ShortExpedition<M: Mission> {
    inner: Expedition<M>,
}

impl<M: Mission> ShortExpedition<M> {
    pub fn new(expedition: Expedition<M>) -> Self {
        Self { inner: expedition }
    }

    pub fn expedition(&self) -> &Expedition<M> {
        &self.inner
    }

    /// Runs the workload, then closes whatever the outcome.
    pub async fn launch(&mut self, opts: &LaunchOptions) -> Result<Handle> {
        let result = match self.inner.launch_spec(opts) {
            Ok(spec) => {
                info!(name = %spec.name, image = %spec.img, "Launching");
                self.inner.captain.run(&spec, opts.foreground).await
            }
            Err(e) => Err(e),
        };

        self.close(result.is_ok()).await;
        result
    }

    /// Disposes the workload and its volumes. Logs are kept in debug mode
    /// or when the run did not complete.
    async fn close(&mut self, completed: bool) {
        let name = self.inner.name();

        if self.inner.captain.interrupted() {
            warn!(name = %name, "Workload was interrupted by the operator");
        }

        if let Err(e) = self.inner.captain.dispose_run(&name, true).await {
            warn!(name = %name, error = %e, "Failed to dispose workload");
        }

        let keep_logs = self.inner.log.debug_mode() || !completed;
        self.inner.remove_vols(keep_logs).await;
        self.inner.close_captain().await;
    }
}

// =============================================================================
// Long Expedition
// =============================================================================

/// Supervised launch that reverts itself on failure.
pub struct LongExpedition<M: Mission> {
    inner: Expedition<M>,
}

impl<M: Mission> LongExpedition<M> {
    pub fn new(expedition: Expedition<M>) -> Self {
        Self { inner: expedition }
    }

    pub fn expedition(&self) -> &Expedition<M> {
        &self.inner
    }

    /// Deploys `opts.tasks` replicas. On failure, the workload and its
    /// volumes are removed before the original error is returned.
    pub async fn launch(&mut self, opts: &LaunchOptions) -> Result<Handle> {
        let result = match self.inner.launch_spec(opts) {
            Ok(spec) => {
                info!(name = %spec.name, image = %spec.img, replicas = opts.tasks, "Deploying");
                self.inner.captain.deploy(&spec, opts.tasks).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(handle) => {
                self.inner.close_captain().await;
                Ok(handle)
            }
            Err(e) => {
                error!(name = %self.inner.name(), error = %e, "Deploy failed, reverting");
                self.revert().await;
                Err(e)
            }
        }
    }

    /// Removes the workload first, then every volume, then the session.
    async fn revert(&mut self) {
        let name = self.inner.name();

        if let Err(e) = self.inner.captain.dispose_deploy(&name, true).await {
            error!(name = %name, error = %e, "Failed to revert deployment");
        }

        let keep_logs = self.inner.log.debug_mode();
        self.inner.remove_vols(keep_logs).await;
        self.inner.close_captain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_join_env_keeps_new_keys() {
        let merged = join_env(&env(&[("A", "1")]), env(&[("B", "2")])).unwrap();
        assert_eq!(merged, env(&[("A", "1"), ("B", "2")]));
    }

    #[test]
    fn test_join_env_rejects_override() {
        let result = join_env(
            &env(&[(ENV_CONTAINER_PURPOSE, "other")]),
            env(&[(ENV_CONTAINER_PURPOSE, "nha-train")]),
        );
        assert!(matches!(result, Err(Error::Misusage(_))));
    }

    #[test]
    fn test_join_env_accepts_same_value() {
        let merged = join_env(&env(&[("A", "1")]), env(&[("A", "1")])).unwrap();
        assert_eq!(merged.len(), 1);
    }
}
