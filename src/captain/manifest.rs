//! Orchestrator manifests.
//!
//! Pure builders from launch parameters to JSON manifests. Nothing here
//! talks to the cluster; `null` fields are stripped by [`clean`] before a
//! manifest leaves this module, so optional parts simply disappear.

use crate::cargo::{Cargo, CargoKind};
use crate::compass::{Healthcheck, NfsServer, Quota, ResourceProfile, ServiceType};
use crate::constants::{HEALTH_URL, MULE_IMG, HANG_CMD, STG_MOUNT};
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::warn;

/// Removes `null` members recursively.
pub fn clean(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, clean(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(clean).collect()),
        other => other,
    }
}

// =============================================================================
// Resources
// =============================================================================

/// Megabytes as an orchestrator quantity: whole `Gi` from 1024 up, else `Mi`.
pub fn kube_memory(mb: u64) -> String {
    if mb >= 1024 {
        format!("{}Gi", mb / 1024)
    } else {
        format!("{mb}Mi")
    }
}

fn quota(q: &Quota) -> Value {
    clean(json!({
        "cpu": q.cpu,
        "memory": q.memory_mb.map(kube_memory),
    }))
}

/// Container `resources` block. GPU profiles add one GPU to the limits.
pub fn kube_resources(profile: Option<&ResourceProfile>) -> Option<Value> {
    let profile = profile?;
    let mut limits = quota(&profile.limits);

    if profile.enable_gpu
        && let Value::Object(map) = &mut limits
    {
        map.insert("nvidia.com/gpu".to_string(), json!(1));
    }

    Some(json!({
        "requests": quota(&profile.requests),
        "limits": limits,
    }))
}

pub fn env_list(env: &BTreeMap<String, String>) -> Vec<Value> {
    env.iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect()
}

// =============================================================================
// Probes
// =============================================================================

/// Liveness probe, only when the caller allows it and the policy is enabled.
pub fn liveness_probe(healthcheck: &Healthcheck, allow_probe: bool) -> Option<Value> {
    (allow_probe && healthcheck.enabled).then(|| {
        json!({
            "exec": {"command": ["curl", "-f", HEALTH_URL]},
            "periodSeconds": healthcheck.interval,
            "timeoutSeconds": healthcheck.timeout,
            "failureThreshold": healthcheck.retries,
            "initialDelaySeconds": healthcheck.start_period,
        })
    })
}

/// Readiness probe starting after `delay` seconds; none for zero.
pub fn readiness_probe(delay: u32) -> Option<Value> {
    (delay > 0).then(|| {
        json!({
            "exec": {"command": ["curl", "-f", HEALTH_URL]},
            "initialDelaySeconds": delay,
            "periodSeconds": 30,
            "failureThreshold": 5,
        })
    })
}

// =============================================================================
// Volumes
// =============================================================================

/// Volume references (`volumeMounts`) and definitions (`volumes`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volumes {
    pub refs: Vec<Value>,
    pub defs: Vec<Value>,
}

impl Volumes {
    pub fn extend(&mut self, other: Volumes) {
        self.refs.extend(other.refs);
        self.defs.extend(other.defs);
    }
}

fn push_volume(vols: &mut Volumes, name: &str, mount_to: &str, source: Value) {
    vols.refs.push(json!({"name": name, "mountPath": mount_to}));

    let mut def = Map::new();
    def.insert("name".to_string(), json!(name));
    if let Value::Object(source) = source {
        def.extend(source);
    }
    vols.defs.push(Value::Object(def));
}

/// Volumes for cargos.
///
/// Empty cargos are claims, mapped cargos are host paths (or NFS paths),
/// and everything else is a directory named after the cargo on the NFS
/// server.
pub fn kube_vols(cargos: &[Cargo], nfs: &NfsServer) -> Volumes {
    let mut vols = Volumes::default();

    for cargo in cargos {
        let name = cargo.full_name();

        let source = match cargo.kind() {
            CargoKind::Empty => json!({"persistentVolumeClaim": {"claimName": name}}),
            CargoKind::Mapped { src, nfs: false } => {
                json!({"hostPath": {"path": src, "type": "DirectoryOrCreate"}})
            }
            CargoKind::Mapped { src, nfs: true } => {
                json!({"nfs": {"server": nfs.server, "path": src}})
            }
            _ => json!({"nfs": {"server": nfs.server, "path": format!("{}/{name}", nfs.path)}}),
        };

        push_volume(&mut vols, &name, cargo.mount_to(), source);
    }

    vols
}

/// Extra `src:dest` mounts. Directory mounts always refer to the NFS server.
pub fn kube_mounts(mounts: &[String], nfs: &NfsServer) -> Result<Volumes> {
    let cargos = mounts
        .iter()
        .enumerate()
        .map(|(index, mount)| {
            let mut parts = mount.split(':');
            match (parts.next(), parts.next()) {
                (Some(src), Some(dest)) if !src.is_empty() && !dest.is_empty() => Ok(
                    Cargo::mapped(format!("extra-mount-{index}"), dest, src, true),
                ),
                _ => Err(Error::Configuration(format!(
                    "mount must be in the form src:dest, got: {mount}"
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(kube_vols(&cargos, nfs))
}

/// The mule mounts the NFS root at the staging path.
pub fn mule_mount(mule: &str, nfs: &NfsServer) -> Volumes {
    let cargo = Cargo::mapped(mule, STG_MOUNT, nfs.path.clone(), true);
    kube_vols(&[cargo], nfs)
}

// =============================================================================
// Services
// =============================================================================

/// One port of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<u16>,
}

/// Container port references and service port definitions.
///
/// `host:container` publishes `host` as the node port; `ClusterIP` services
/// cannot, so the node port is dropped with a warning.
pub fn kube_svc_ports(
    name: &str,
    ports: &[String],
    service_type: ServiceType,
) -> Result<(Vec<Value>, Vec<ServicePort>)> {
    let mut refs = Vec::new();
    let mut defs = Vec::new();

    for port in ports {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| Error::Configuration(format!("invalid port mapping: {port}")))
        };

        let parts: Vec<&str> = port.split(':').collect();
        let (mut node_port, target) = match parts.as_slice() {
            [tgt] => (None, parse(tgt)?),
            [src, tgt] => (Some(parse(src)?), parse(tgt)?),
            _ => {
                return Err(Error::Configuration(format!(
                    "invalid port mapping: {port}"
                )));
            }
        };

        if service_type == ServiceType::ClusterIP && node_port.is_some() {
            warn!(port = %port, "Ignoring node port, service type is ClusterIP");
            node_port = None;
        }

        refs.push(json!({"containerPort": target}));
        defs.push(ServicePort {
            name: format!("{name}-{target}"),
            port: target,
            target_port: target,
            node_port,
        });
    }

    Ok((refs, defs))
}

/// Reads the ports of an existing service spec.
pub fn parse_service_ports(ports: &Value) -> Vec<ServicePort> {
    let as_port = |v: &Value| v.as_u64().and_then(|n| u16::try_from(n).ok());

    ports
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|p| ServicePort {
                    name: p["name"].as_str().unwrap_or_default().to_string(),
                    port: as_port(&p["port"]).unwrap_or_default(),
                    target_port: as_port(&p["targetPort"]).unwrap_or_default(),
                    node_port: as_port(&p["nodePort"]),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Whether the new definitions change the exposed ports.
///
/// Node ports are only compared where the new definition sets one; an
/// unset node port keeps whatever was assigned.
pub fn check_port_change(old: &[ServicePort], new: &[ServicePort]) -> bool {
    if old.len() != new.len() {
        return true;
    }

    let mut old: Vec<&ServicePort> = old.iter().collect();
    let mut new: Vec<&ServicePort> = new.iter().collect();
    old.sort_by_key(|p| p.target_port);
    new.sort_by_key(|p| p.target_port);

    old.iter()
        .zip(&new)
        .any(|(o, n)| n.node_port.is_some() && o.node_port != n.node_port)
}

pub fn service_manifest(name: &str, service_type: ServiceType, ports: &[ServicePort]) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name},
        "spec": {
            "selector": {"app": name},
            "type": service_type.to_string(),
            "ports": ports,
        },
    })
}

// =============================================================================
// Workloads
// =============================================================================

/// Parameters of the single container of a workload.
#[derive(Debug, Clone, Default)]
pub struct ContainerParams {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub resources: Option<Value>,
    pub volumes: Volumes,
    pub ports: Vec<Value>,
    pub liveness: Option<Value>,
    pub readiness: Option<Value>,
}

pub fn container(params: &ContainerParams) -> Value {
    clean(json!({
        "name": params.name,
        "image": params.image,
        "imagePullPolicy": "Always",
        "command": (!params.cmd.is_empty()).then_some(&params.cmd),
        "resources": params.resources,
        "volumeMounts": params.volumes.refs,
        "env": env_list(&params.env),
        "ports": params.ports,
        "livenessProbe": params.liveness,
        "readinessProbe": params.readiness,
    }))
}

fn pull_secrets(secret: Option<&str>) -> Option<Value> {
    secret.map(|s| json!([{"name": s}]))
}

/// Pod spec of a one-shot unit: never restarted.
pub fn run_pod_spec(container: Value, volumes: &Volumes, secret: Option<&str>) -> Value {
    clean(json!({
        "restartPolicy": "Never",
        "containers": [container],
        "volumes": volumes.defs,
        "imagePullSecrets": pull_secrets(secret),
    }))
}

pub fn pod_manifest(name: &str, spec: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "labels": {"app": name}},
        "spec": spec,
    })
}

/// Job that runs its pod once, without retries.
pub fn job_manifest(name: &str, spec: Value) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"name": name, "labels": {"app": name}},
        "spec": {
            "backoffLimit": 0,
            "template": {"spec": spec},
        },
    })
}

pub fn deployment_manifest(
    name: &str,
    replicas: u32,
    container: Value,
    volumes: &Volumes,
    secret: Option<&str>,
    updated: &str,
) -> Value {
    clean(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {
                    "labels": {"app": name},
                    "annotations": {"updated": updated},
                },
                "spec": {
                    "containers": [container],
                    "volumes": volumes.defs,
                    "imagePullSecrets": pull_secrets(secret),
                },
            },
        },
    }))
}

/// Horizontal autoscaler targeting the deployment `name`.
pub fn autoscaler_manifest(name: &str, namespace: &str, profile: &ResourceProfile) -> Value {
    json!({
        "apiVersion": "autoscaling/v1",
        "kind": "HorizontalPodAutoscaler",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "minReplicas": profile.min_replicas,
            "maxReplicas": profile.max_replicas,
            "targetCPUUtilizationPercentage": profile.target_cpu_utilization,
            "scaleTargetRef": {"apiVersion": "apps/v1", "name": name, "kind": "Deployment"},
        },
    })
}

/// Claim of at least 1Gi.
pub fn pvc_manifest(name: &str, require_mb: u64, storage_class: Option<&str>) -> Value {
    let storage = format!("{}Gi", (require_mb / 1024).max(1));

    clean(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": name},
        "spec": {
            "storageClassName": storage_class,
            "accessModes": ["ReadWriteOnce"],
            "resources": {"requests": {"storage": storage}},
        },
    }))
}

/// Hanging helper pod with the NFS root at the staging path.
pub fn mule_manifest(name: &str, nfs: &NfsServer) -> Value {
    let volumes = mule_mount(name, nfs);

    pod_manifest(
        name,
        json!({
            "containers": [{
                "name": name,
                "image": MULE_IMG,
                "command": HANG_CMD,
                "volumeMounts": volumes.refs,
            }],
            "volumes": volumes.defs,
        }),
    )
}
