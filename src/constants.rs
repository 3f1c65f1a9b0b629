//! # Orchestration Constants
//!
//! Names, paths and timeouts shared by the captains, cargos and
//! expeditions. Anything that ends up in a container name, a mount path or
//! a generated shell command is defined here so that both backends agree.
//!
//! ## Cross-References
//!
//! - [`crate::captain`]: mule image, staging mount, network and polling
//! - [`crate::cargo`]: on-board directory layout
//! - [`crate::expedition`]: sections and environment variables
//! - [`crate::island`]: island ports and disk defaults

use std::time::Duration;

// =============================================================================
// Images and Commands
// =============================================================================

/// Default image tag.
pub const LATEST: &str = "latest";

/// Registry used when none is configured. Images tagged with it are never
/// pushed.
pub const LOCAL_REGISTRY: &str = "noronha";

/// Overlay network shared by every engine service.
pub const NETWORK: &str = "nha-net";

/// Command that keeps a container alive without doing anything.
pub const HANG_CMD: &[&str] = &["tail", "-F", "/dev/null"];

/// Image for the volume-staging helper unit.
///
/// Must ship `sh`, `ls`, `rm`, `mkdir` and `curl`; the orchestrator backend
/// runs heavy-content deployables inside it.
pub const MULE_IMG: &str = "appropriate/curl:latest";

/// Mount point of the staged volume inside the mule.
pub const STG_MOUNT: &str = "/staging";

/// Suffix appended to every mule name.
pub const MULE_SUFFIX: &str = "mule";

/// Endpoint probed by liveness and readiness checks.
pub const HEALTH_URL: &str = "http://localhost:8080/health";

// =============================================================================
// Sections
// =============================================================================
//
// A section prefixes every resource name so that the volumes of a training
// can never collide with those of a deployment.
// =============================================================================

/// Section of the framework's own auxiliary services.
pub const SECTION_ISLE: &str = "nha-isle";

/// Section of interactive notebooks.
pub const SECTION_IDE: &str = "nha-ide";

/// Section of one-shot trainings.
pub const SECTION_TRAIN: &str = "nha-train";

/// Section of supervised deployments.
pub const SECTION_DEPL: &str = "nha-depl";

/// Section of project images.
pub const SECTION_PROJ: &str = "nha-proj";

/// Every valid section.
pub const SECTIONS: &[&str] = &[
    SECTION_ISLE,
    SECTION_IDE,
    SECTION_TRAIN,
    SECTION_DEPL,
    SECTION_PROJ,
];

// =============================================================================
// On-Board Layout
// =============================================================================

/// Root of the framework's files inside a managed container.
pub const NHA_HOME: &str = "/nha";

/// Model files shared with the container.
pub const SHARED_MODEL_DIR: &str = "/nha/model";

/// Dataset files shared with the container.
pub const SHARED_DATA_DIR: &str = "/nha/data";

/// Metadata documents.
pub const META_DIR: &str = "/nha/meta";

/// Configuration snapshot.
pub const CONF_DIR: &str = "/nha/conf";

/// Log directory.
pub const LOG_DIR: &str = "/logs";

/// Entrypoint script of framework-built images.
pub const ENTRYPOINT: &str = "/entrypoint.sh";

/// File name of the configuration snapshot inside [`CONF_DIR`].
pub const CONF_FILE: &str = "nha.yaml";

// =============================================================================
// Environment Variables
// =============================================================================

/// Tells the container which kind of workload it is running.
pub const ENV_CONTAINER_PURPOSE: &str = "CONTAINER_PURPOSE";

/// Set on deployments that serve online inference.
pub const ENV_OPEN_SEA: &str = "IS_IT_OPEN_SEA";

// =============================================================================
// Ports
// =============================================================================

/// Port a notebook server listens on inside its container.
pub const NOTEBOOK_PORT: u16 = 8888;

/// Default host port for notebooks.
pub const NOTEBOOK_HOST_PORT: u16 = 30088;

/// Port an inference server listens on inside its container.
pub const INFERENCE_PORT: u16 = 8080;

// =============================================================================
// Sizing
// =============================================================================

/// Size assumed for a bulk file whose schema does not declare one.
pub const DEFAULT_FILE_MB: u64 = 10;

/// Space requested for cargos that do not estimate their own.
pub const DEFAULT_REQUIRE_MB: u64 = 10;

/// Default disk allocation for island data volumes (100 GB).
pub const DEFAULT_ISLAND_MB: u64 = 100 * 1024;

/// Default disk allocation for the document database (1 GB).
pub const DEFAULT_MONGO_MB: u64 = 1024;

// =============================================================================
// Timeouts
// =============================================================================

/// Default backend API timeout in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 60;

/// Interval between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait after removing a load balancer before recreating it.
///
/// Load balancer removal is not immediate on most clouds.
pub const LOAD_BALANCER_GRACE: Duration = Duration::from_secs(15);

/// Attempts to re-attach to a pod's log stream while it is still running.
pub const LOG_WATCH_ATTEMPTS: usize = 3;

/// Force-update counter bumped on every engine service update.
pub const FORCE_UPDATE: u64 = 5;
