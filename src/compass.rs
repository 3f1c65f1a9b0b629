//! # Compass: configuration resolution
//!
//! The compass is an immutable snapshot of the YAML configuration. It is
//! loaded exactly once during bootstrap ([`Compass::load`] or
//! [`Compass::discover`]) and then handed to every component that needs it.
//!
//! ```yaml
//! captain:
//!   type: kube
//!   api_timeout: 60
//!   namespace: nha
//!   nfs: {server: 10.0.0.7, path: /shared}
//!   resource_profiles:
//!     nha-train:
//!       requests: {cpu: 500m, memory: 512}
//!       limits: {cpu: 2, memory: 4096}
//! docker:
//!   registry: registry.example.com:5000
//! logger:
//!   level: DEBUG
//! islands:
//!   mongo: {native: true, port: 30017}
//! ```
//!
//! Resource profiles and NFS servers accept either one global mapping or a
//! mapping keyed by section.

use crate::constants::{DEFAULT_API_TIMEOUT_SECS, SECTIONS};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an explicit configuration file.
pub const CONF_ENV_VAR: &str = "NHA_CONF";

/// Smallest CPU fraction a profile may request.
pub const MIN_CPU: f64 = 0.001;

// =============================================================================
// Root
// =============================================================================

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Compass {
    pub captain: CaptainCompass,
    pub docker: DockerCompass,
    pub logger: LoggerCompass,
    pub islands: IslandsCompass,
    pub warehouse: WarehouseCompass,
}

impl Compass {
    /// Loads the configuration from an explicit file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read '{}': {e}", path.display()))
        })?;

        let compass = Self::from_yaml_str(&text)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(compass)
    }

    /// Loads `$NHA_CONF`, then `~/.nha/nha.yaml`, falling back to defaults.
    pub fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(CONF_ENV_VAR) {
            return Self::load(Path::new(&path));
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses a configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(text)
            .map_err(|e| Error::Configuration(format!("malformed configuration: {e}")))
    }

    /// Renders the snapshot back to YAML (shipped to containers in the conf cargo).
    pub fn dump(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".nha").join("nha.yaml"))
    }
}

// =============================================================================
// Captain
// =============================================================================

/// Container-manager kind selected by `captain.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Single-host container engine (swarm services for replicas).
    Engine,
    /// Multi-node cluster orchestrator.
    Orchestrator,
}

/// Accepted `captain.type` keys.
const BACKEND_LOOKUP: &[(&str, BackendKind)] = &[
    ("swarm", BackendKind::Engine),
    ("engine", BackendKind::Engine),
    ("kube", BackendKind::Orchestrator),
    ("orchestrator", BackendKind::Orchestrator),
];

impl BackendKind {
    /// Maps a configuration key to a backend kind.
    pub fn resolve(key: &str) -> Result<Self> {
        let key = key.trim().to_lowercase();

        BACKEND_LOOKUP
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| Error::Resolution {
                reference: key,
                options: BACKEND_LOOKUP.iter().map(|(k, _)| k.to_string()).collect(),
            })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Engine => write!(f, "engine"),
            BackendKind::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

/// `captain` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptainCompass {
    /// Backend key (see [`BackendKind::resolve`]).
    #[serde(rename = "type")]
    pub kind: String,
    /// Seconds to wait on backend operations.
    pub api_timeout: u64,
    /// Orchestrator namespace.
    pub namespace: Option<String>,
    /// Storage class for persistent volume claims.
    pub storage_class: Option<String>,
    /// Service type for exposed workloads.
    pub service_type: ServiceType,
    /// NFS server, global or per section.
    pub nfs: Option<Value>,
    /// Resource profiles, global or per section.
    pub resource_profiles: Option<Value>,
    /// Liveness policy.
    pub healthcheck: Healthcheck,
}

impl Default for CaptainCompass {
    fn default() -> Self {
        Self {
            kind: "swarm".to_string(),
            api_timeout: DEFAULT_API_TIMEOUT_SECS,
            namespace: None,
            storage_class: None,
            service_type: ServiceType::default(),
            nfs: None,
            resource_profiles: None,
            healthcheck: Healthcheck::default(),
        }
    }
}

impl CaptainCompass {
    /// Configured backend kind.
    pub fn backend(&self) -> Result<BackendKind> {
        BackendKind::resolve(&self.kind)
    }

    /// API timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }

    /// Namespace required by the orchestrator backend.
    pub fn namespace(&self) -> Result<&str> {
        match self.namespace.as_deref() {
            Some(ns) if !ns.trim().is_empty() => Ok(ns),
            _ => Err(Error::Configuration(
                "the orchestrator backend requires an existing namespace to be configured"
                    .to_string(),
            )),
        }
    }

    /// Resolves the NFS server for a section.
    pub fn nfs(&self, section: &str) -> Result<NfsServer> {
        let Some(Value::Mapping(map)) = &self.nfs else {
            return Err(Error::Configuration(format!(
                "could not determine NFS server for section '{section}'"
            )));
        };

        let entry = if has_keys(map, &["server", "path"]) {
            Value::Mapping(map.clone())
        } else if let Some(v) = map.get(section) {
            v.clone()
        } else {
            return Err(Error::Configuration(format!(
                "could not determine NFS server for section '{section}'"
            )));
        };

        serde_yaml::from_value(entry).map_err(|_| {
            Error::Configuration(
                "NFS server must be a mapping in the form {server: 127.0.0.1, path: /shared/path}"
                    .to_string(),
            )
        })
    }

    /// Resolves and validates the resource profile for a section.
    ///
    /// Returns `Ok(None)` when no profile applies.
    pub fn resource_profile(&self, section: &str) -> Result<Option<ResourceProfile>> {
        let Some(Value::Mapping(map)) = &self.resource_profiles else {
            return Ok(None);
        };

        let profile = if map.contains_key("requests") || map.contains_key("limits") {
            map
        } else {
            match map.get(section) {
                Some(Value::Mapping(m)) => m,
                Some(_) => return Err(profile_shape_error()),
                None => return Ok(None),
            }
        };

        ResourceProfile::from_mapping(profile).map(Some)
    }
}

/// Checks whether a mapping has exactly the given keys.
fn has_keys(map: &Mapping, keys: &[&str]) -> bool {
    map.len() == keys.len() && keys.iter().all(|k| map.contains_key(*k))
}

fn profile_shape_error() -> Error {
    Error::Configuration(
        "resource profile must be a mapping in the form {requests: {...}, limits: {...}}"
            .to_string(),
    )
}

/// Kind of network service exposing a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    NodePort,
    ClusterIP,
    LoadBalancer,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

/// NFS coordinates backing orchestrator volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsServer {
    pub server: String,
    pub path: String,
}

/// Liveness policy, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Healthcheck {
    pub enabled: bool,
    pub start_period: u64,
    pub interval: u64,
    pub timeout: u64,
    pub retries: u32,
}

impl Default for Healthcheck {
    fn default() -> Self {
        Self {
            enabled: false,
            start_period: 60,
            interval: 30,
            timeout: 3,
            retries: 3,
        }
    }
}

// =============================================================================
// Resource Profiles
// =============================================================================

/// CPU and memory for one side (requests or limits) of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quota {
    /// Cores, with at most three decimals.
    pub cpu: Option<f64>,
    /// Megabytes.
    pub memory_mb: Option<u64>,
}

/// Validated resource profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProfile {
    pub requests: Quota,
    pub limits: Quota,
    pub enable_gpu: bool,
    pub auto_scale: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_utilization: u32,
}

impl ResourceProfile {
    fn from_mapping(map: &Mapping) -> Result<Self> {
        let requests = match map.get("requests") {
            Some(Value::Mapping(m)) => parse_quota(m)?,
            _ => return Err(profile_shape_error()),
        };
        let limits = match map.get("limits") {
            Some(Value::Mapping(m)) => parse_quota(m)?,
            _ => return Err(profile_shape_error()),
        };

        Ok(Self {
            requests,
            limits,
            enable_gpu: get_bool(map, "enable_gpu")?,
            auto_scale: get_bool(map, "auto_scale")?,
            min_replicas: get_u32(map, "minReplicas", 1)?,
            max_replicas: get_u32(map, "maxReplicas", 10)?,
            target_cpu_utilization: get_u32(map, "targetCPUUtilizationPercentage", 50)?,
        })
    }

    /// CPU to hand to a single-container run (limit, else request).
    pub fn cpu(&self) -> Option<f64> {
        self.limits.cpu.or(self.requests.cpu)
    }

    /// Memory to hand to a single-container run (limit, else request).
    pub fn memory_mb(&self) -> Option<u64> {
        self.limits.memory_mb.or(self.requests.memory_mb)
    }
}

fn parse_quota(map: &Mapping) -> Result<Quota> {
    let cpu = match map.get("cpu") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_cpu(v)?),
    };

    let memory_mb = match map.get("memory") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) if n.is_u64() => n.as_u64(),
        Some(other) => {
            return Err(Error::Configuration(format!(
                "memory must be an integer number of MB, got: {}",
                render(other)
            )));
        }
    };

    Ok(Quota { cpu, memory_mb })
}

/// Parses a CPU amount: a number of cores or a milli-core string (`500m`).
pub fn parse_cpu(value: &Value) -> Result<f64> {
    let cores = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(millis) = s.strip_suffix('m') {
                millis.parse::<f64>().ok().map(|m| m / 1000.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    }
    .ok_or_else(|| {
        Error::Configuration(format!(
            "CPU must be a number of cores or a milli-core string, got: {}",
            render(value)
        ))
    })?;

    let rounded = (cores * 1000.0).round() / 1000.0;

    if !rounded.is_finite() || rounded < MIN_CPU {
        return Err(Error::Configuration(format!(
            "CPU must be at least {MIN_CPU} cores, got: {}",
            render(value)
        )));
    }

    Ok(rounded)
}

fn get_bool(map: &Mapping, key: &str) -> Result<bool> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(Error::Configuration(format!(
            "'{key}' must be a boolean, got: {}",
            render(other)
        ))),
    }
}

fn get_u32(map: &Mapping, key: &str, default: u32) -> Result<u32> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::Configuration(format!("'{key}' must be a positive integer"))),
        Some(other) => Err(Error::Configuration(format!(
            "'{key}' must be a positive integer, got: {}",
            render(other)
        ))),
    }
}

fn render(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}

// =============================================================================
// Docker
// =============================================================================

/// `docker` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerCompass {
    /// Registry images are pushed to. Unset means local images only.
    pub registry: Option<String>,
    /// Pull secret referenced by orchestrator pods.
    pub image_pull_secret: Option<String>,
    /// Replace every workload command with a no-op hang.
    pub mock: bool,
}

// =============================================================================
// Logger
// =============================================================================

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stderr,
    Stdout,
    File,
}

/// `logger` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerCompass {
    /// Level name (`ERROR`, `WARN`, `INFO`, `DEBUG`, `TRACE`).
    pub level: String,
    /// Human-readable lines instead of JSON.
    pub pretty: bool,
    /// Debug mode keeps log volumes and surfaces raw errors.
    pub debug: bool,
    pub target: LogTarget,
    /// Directory for [`LogTarget::File`].
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggerCompass {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            pretty: true,
            debug: false,
            target: LogTarget::Stderr,
            directory: None,
            file_name: "noronha.log".to_string(),
        }
    }
}

impl LoggerCompass {
    /// Full path of the log file.
    pub fn file_path(&self) -> PathBuf {
        let dir = self.directory.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".nha").join("logs"))
                .unwrap_or_else(|| PathBuf::from(".nha/logs"))
        });
        dir.join(&self.file_name)
    }
}

// =============================================================================
// Islands
// =============================================================================

/// Per-island settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IslandCompass {
    /// Managed by this framework. Unset means "foreign mode": the service
    /// runs elsewhere and is only referenced.
    pub native: bool,
    /// Host port to publish.
    pub port: Option<u16>,
    pub disk_allocation_mb: Option<u64>,
}

impl Default for IslandCompass {
    fn default() -> Self {
        Self {
            native: false,
            port: None,
            disk_allocation_mb: None,
        }
    }
}

/// `islands` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IslandsCompass {
    /// Directory holding one build context per island alias.
    pub source_root: Option<PathBuf>,
    #[serde(flatten)]
    pub islands: BTreeMap<String, IslandCompass>,
}

impl IslandsCompass {
    /// Settings for an island alias, defaulting when absent.
    pub fn get(&self, alias: &str) -> IslandCompass {
        self.islands.get(alias).cloned().unwrap_or_default()
    }

    /// Build context directory for an island alias.
    pub fn source(&self, alias: &str) -> PathBuf {
        let root = self.source_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("noronha").join("isle"))
                .unwrap_or_else(|| PathBuf::from("isle"))
        });
        root.join(alias)
    }
}

// =============================================================================
// Warehouse
// =============================================================================

/// `warehouse` section for the local bulk store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseCompass {
    pub root: Option<PathBuf>,
    /// URL containers download bulk files from.
    pub public_url: Option<String>,
}

/// Returns true if `section` is one of the known sections.
pub fn is_section(section: &str) -> bool {
    SECTIONS.contains(&section)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_millis() {
        assert_eq!(parse_cpu(&Value::String("500m".into())).unwrap(), 0.5);
        assert_eq!(parse_cpu(&Value::String("1m".into())).unwrap(), 0.001);
    }

    #[test]
    fn test_parse_cpu_rejects_zero() {
        assert!(parse_cpu(&Value::String("0m".into())).is_err());
        assert!(parse_cpu(&serde_yaml::from_str::<Value>("0.0001").unwrap()).is_err());
    }

    #[test]
    fn test_parse_cpu_rejects_non_finite() {
        for text in ["nan", "inf", "infm", "-inf"] {
            let result = parse_cpu(&Value::String(text.into()));
            assert!(result.is_err(), "{text} accepted: {result:?}");
        }

        for yaml in [".nan", ".inf"] {
            let value: Value = serde_yaml::from_str(yaml).unwrap();
            assert!(parse_cpu(&value).is_err(), "{yaml} accepted");
        }
    }

    #[test]
    fn test_parse_cpu_number() {
        let v: Value = serde_yaml::from_str("2").unwrap();
        assert_eq!(parse_cpu(&v).unwrap(), 2.0);
    }

    #[test]
    fn test_backend_lookup() {
        assert_eq!(BackendKind::resolve("Kube").unwrap(), BackendKind::Orchestrator);
        assert_eq!(BackendKind::resolve(" swarm ").unwrap(), BackendKind::Engine);
        assert!(matches!(
            BackendKind::resolve("nomad"),
            Err(Error::Resolution { .. })
        ));
    }
}
