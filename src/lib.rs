//! # noronha-bay
//!
//! **Container-Lifecycle Orchestration for Machine-Learning Workloads**
//!
//! This crate launches notebooks, trainings, deployments and the
//! framework's own services as containers, on either a single-host
//! container engine or a cluster orchestrator. One uniform contract hides
//! which backend is active; volumes are staged through a disposable helper
//! unit (the *mule*) before the real workload starts.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           noronha-bay                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │            Expedition (Short: run │ Long: deploy)           │    │
//! │  │   Mission hooks → LaunchSpec → launch → close / revert      │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                     Captain Trait                         │      │
//! │  │  run │ deploy │ dispose_run │ dispose_deploy              │      │
//! │  │  load_vol │ rm_vol │ close                                │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                 Cargo → Content → Barrel                  │      │
//! │  │  Literal │ Binary │ Warehouse-backed bulk files           │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                          Backends                                   │
//! │  ┌───────────────────────────┐  ┌───────────────────────────┐       │
//! │  │      EngineCaptain        │  │   OrchestratorCaptain     │       │
//! │  │  containers │ swarm       │  │  pods │ jobs │ deployments│       │
//! │  │  named volumes            │  │  NFS volumes │ services   │       │
//! │  │  mule per load_vol        │  │  mule per session         │       │
//! │  └───────────────────────────┘  └───────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure Semantics
//!
//! - Volume staging is atomic per cargo: a failed stage removes the volume
//!   and returns the original error.
//! - A failed deploy reverts the whole expedition (workload, then volumes,
//!   then session) before the original error is returned.
//! - One-shot runs always clean up; cleanup errors are logged, never raised.
//!
//! # Example
//!
//! ```rust,ignore
//! use noronha_bay::{Compass, LogContext, NotebookMission, ShortExpedition, Expedition};
//! use noronha_bay::captain::get_captain;
//! use noronha_bay::image::ImageSpec;
//!
//! async fn note(project: &str) -> noronha_bay::Result<()> {
//!     let compass = Compass::discover()?;
//!     let log = LogContext::new(&compass.logger);
//!     let mission = NotebookMission::new(project);
//!     let captain = get_captain(noronha_bay::SECTION_IDE, &compass).await?;
//!     let img = ImageSpec::for_project(&compass.docker, project, "latest");
//!
//!     let expedition = Expedition::new(mission, img, &compass, captain, log)?;
//!     ShortExpedition::new(expedition).launch(&Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod barrel;
pub mod captain;
pub mod cargo;
pub mod compass;
pub mod constants;
pub mod error;
pub mod expedition;
pub mod image;
pub mod island;
pub mod logging;
pub mod warehouse;
pub mod workpath;

// Re-exports
pub use barrel::{Barrel, Deployable, FileSpec};
pub use captain::{Backend, Captain, Handle, Interrupt, LaunchSpec, get_captain};
pub use cargo::{Cargo, CargoKind, Content, MountMode};
pub use compass::{BackendKind, Compass};
pub use constants::*;
pub use error::{Error, Result};
pub use expedition::{
    DeploymentMission, Expedition, LaunchOptions, LongExpedition, Mission, NotebookMission,
    ShortExpedition, TrainingMission,
};
pub use image::{ImageBuilder, ImageSpec, ImageTagger};
pub use island::{Island, IslandKind, get_island};
pub use logging::LogContext;
pub use warehouse::{LocalWarehouse, StoreHierarchy, Warehouse};
pub use workpath::Workpath;
