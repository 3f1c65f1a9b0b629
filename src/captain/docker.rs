//! Engine API over the `docker` command line.

use super::engine::{ContainerInfo, EngineApi, RunOptions, ServiceInfo, ServiceOptions};
use crate::compass::Quota;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Drives the local engine through its CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Uses another CLI binary with a compatible interface.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn docker(&self, operation: &str, args: Vec<String>) -> Result<String> {
        debug!(program = %self.program, ?args, "Invoking engine CLI");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::engine(operation, format!("cannot invoke {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::engine(operation, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Lines of `ls`-style output that equal `name` exactly.
    async fn list_exact(&self, operation: &str, args: Vec<String>, name: &str) -> Result<bool> {
        let out = self.docker(operation, args).await?;
        Ok(out.lines().any(|l| l.trim() == name))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineApi for DockerCli {
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let out = self
            .docker(
                "list containers",
                strings(&["ps", "-a", "--filter", &format!("name=^{name}$"), "--format", "{{.Names}}\t{{.State}}"]),
            )
            .await?;

        Ok(out.lines().find_map(|line| {
            let (found, state) = line.split_once('\t')?;
            (found.trim() == name).then(|| ContainerInfo {
                name: name.to_string(),
                running: state.trim() == "running",
            })
        }))
    }

    async fn run_container(&self, opts: &RunOptions) -> Result<String> {
        let out = self.docker("run container", run_args(opts)).await?;
        Ok(out.trim().to_string())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.docker("remove container", strings(&["rm", "-f", name]))
            .await
            .map(drop)
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<String> {
        let mut args = strings(&["exec", name]);
        args.extend(cmd.iter().cloned());
        self.docker("exec in container", args).await
    }

    async fn copy_to(&self, src: &Path, container: &str, dest: &str) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            src.display().to_string(),
            format!("{container}:{dest}"),
        ];
        self.docker("copy into container", args).await.map(drop)
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        self.list_exact(
            "list volumes",
            strings(&["volume", "ls", "--filter", &format!("name={name}"), "--format", "{{.Name}}"]),
            name,
        )
        .await
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.docker("create volume", strings(&["volume", "create", name]))
            .await
            .map(drop)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker("remove volume", strings(&["volume", "rm", "-f", name]))
            .await
            .map(drop)
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        self.list_exact(
            "list networks",
            strings(&["network", "ls", "--filter", &format!("name={name}"), "--format", "{{.Name}}"]),
            name,
        )
        .await
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let args = strings(&["network", "create", "--driver", "overlay", "--scope", "swarm", name]);
        self.docker("create network", args).await.map(drop)
    }

    async fn find_service(&self, name: &str) -> Result<Option<ServiceInfo>> {
        let out = self
            .docker(
                "list services",
                strings(&["service", "ls", "--filter", &format!("name={name}"), "--format", "{{.ID}}\t{{.Name}}"]),
            )
            .await?;

        Ok(out.lines().find_map(|line| {
            let (id, found) = line.split_once('\t')?;
            (found.trim() == name).then(|| ServiceInfo {
                id: id.trim().to_string(),
                name: name.to_string(),
            })
        }))
    }

    async fn create_service(&self, opts: &ServiceOptions) -> Result<()> {
        self.docker("create service", service_create_args(opts))
            .await
            .map(drop)
    }

    async fn update_service(&self, opts: &ServiceOptions) -> Result<()> {
        let spec = self
            .docker(
                "inspect service",
                strings(&["service", "inspect", "--format", "{{json .Spec}}", &opts.name]),
            )
            .await?;
        let current = CurrentService::from_spec(&spec)?;

        self.docker("update service", service_update_args(opts, &current))
            .await
            .map(drop)
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        self.docker("remove service", strings(&["service", "rm", name]))
            .await
            .map(drop)
    }

    async fn build_image(&self, context: &Path, target: &str) -> Result<()> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            target.to_string(),
            context.display().to_string(),
        ];
        self.docker("build image", args).await.map(drop)
    }

    async fn pull_image(&self, target: &str) -> Result<()> {
        self.docker("pull image", strings(&["pull", target]))
            .await
            .map(drop)
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        self.docker("tag image", strings(&["tag", source, target]))
            .await
            .map(drop)
    }

    async fn push_image(&self, target: &str) -> Result<()> {
        self.docker("push image", strings(&["push", target]))
            .await
            .map(drop)
    }

    async fn remove_image(&self, target: &str) -> Result<()> {
        self.docker("remove image", strings(&["rmi", target]))
            .await
            .map(drop)
    }
}

// =============================================================================
// Argument Builders
// =============================================================================

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// `docker run -d ...` arguments.
pub(crate) fn run_args(opts: &RunOptions) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name", &opts.name]);

    for port in &opts.ports {
        args.push("-p".to_string());
        args.push(port.clone());
    }

    for (key, value) in &opts.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for volume in &opts.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }

    if let Some(cpus) = opts.cpus {
        args.push("--cpus".to_string());
        args.push(cpus.to_string());
    }

    if let Some(mb) = opts.memory_mb {
        args.push("--memory-reservation".to_string());
        args.push(format!("{mb}m"));
    }

    if opts.gpu {
        args.push("--gpus".to_string());
        args.push("all".to_string());
    }

    args.push(opts.image.clone());
    args.extend(opts.cmd.iter().cloned());
    args
}

/// Translates `volume:path[:mode]` into a `--mount` value.
pub(crate) fn mount_spec(descriptor: &str) -> String {
    let mut parts = descriptor.splitn(3, ':');
    let src = parts.next().unwrap_or_default();
    let dest = parts.next().unwrap_or_default();
    let read_only = parts.next() == Some("ro");

    let kind = if src.starts_with('/') { "bind" } else { "volume" };
    let mut spec = format!("type={kind},source={src},target={dest}");

    if read_only {
        spec.push_str(",readonly");
    }
    spec
}

fn push_quota(args: &mut Vec<String>, flag: &str, quota: &Quota) {
    if let Some(cpu) = quota.cpu {
        args.push(format!("--{flag}-cpu"));
        args.push(cpu.to_string());
    }

    if let Some(mb) = quota.memory_mb {
        args.push(format!("--{flag}-memory"));
        args.push(format!("{mb}M"));
    }
}

fn push_health(args: &mut Vec<String>, opts: &ServiceOptions) {
    let Some(probe) = &opts.healthcheck else {
        return;
    };

    args.push("--health-cmd".to_string());
    args.push(probe.cmd.clone());
    args.push("--health-interval".to_string());
    args.push(format!("{}s", probe.interval));
    args.push("--health-timeout".to_string());
    args.push(format!("{}s", probe.timeout));
    args.push("--health-retries".to_string());
    args.push(probe.retries.to_string());
    args.push("--health-start-period".to_string());
    args.push(format!("{}s", probe.start_period));
}

/// `docker service create ...` arguments.
pub(crate) fn service_create_args(opts: &ServiceOptions) -> Vec<String> {
    let mut args = strings(&[
        "service",
        "create",
        "--detach",
        "--name",
        &opts.name,
        "--replicas",
        &opts.replicas.to_string(),
        "--network",
        &opts.network,
    ]);

    for (published, target) in &opts.published {
        args.push("--publish".to_string());
        args.push(format!("published={published},target={target},protocol=tcp"));
    }

    for (key, value) in &opts.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }

    for mount in &opts.mounts {
        args.push("--mount".to_string());
        args.push(mount_spec(mount));
    }

    push_quota(&mut args, "limit", &opts.limits);
    push_quota(&mut args, "reserve", &opts.reservations);

    if opts.gpu {
        args.push("--generic-resource".to_string());
        args.push("gpu=1".to_string());
    }

    push_health(&mut args, opts);

    args.push(opts.image.clone());
    args.extend(opts.cmd.iter().cloned());
    args
}

/// Env keys, mount targets and published ports of a deployed service.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CurrentService {
    pub env_keys: Vec<String>,
    pub mount_targets: Vec<String>,
    pub published: Vec<(u16, u16)>,
}

impl CurrentService {
    /// Reads the output of `docker service inspect --format '{{json .Spec}}'`.
    pub(crate) fn from_spec(text: &str) -> Result<Self> {
        let spec: serde_json::Value = serde_json::from_str(text.trim())?;
        let container = &spec["TaskTemplate"]["ContainerSpec"];

        let env_keys = container["Env"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|e| e.as_str())
            .map(|e| e.split_once('=').map_or(e, |(k, _)| k).to_string())
            .collect();

        let mount_targets = container["Mounts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m["Target"].as_str())
            .map(str::to_string)
            .collect();

        let published = spec["EndpointSpec"]["Ports"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| {
                let published = u16::try_from(p["PublishedPort"].as_u64()?).ok()?;
                let target = u16::try_from(p["TargetPort"].as_u64()?).ok()?;
                Some((published, target))
            })
            .collect();

        Ok(Self {
            env_keys,
            mount_targets,
            published,
        })
    }
}

fn mount_target(mount: &str) -> &str {
    mount.split(':').nth(1).unwrap_or(mount)
}

fn port_spec((published, target): (u16, u16)) -> String {
    format!("published={published},target={target},protocol=tcp")
}

/// Quotes one word for the shell-style splitting `--args` goes through.
fn shell_quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c);

    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

/// `docker service update --force ...` arguments.
///
/// Entries of `current` missing from `opts` are removed, so the service
/// ends up with exactly the requested env, mounts and ports.
pub(crate) fn service_update_args(opts: &ServiceOptions, current: &CurrentService) -> Vec<String> {
    let mut args = strings(&[
        "service",
        "update",
        "--detach",
        "--image",
        &opts.image,
        "--replicas",
        &opts.replicas.to_string(),
    ]);

    if opts.force_update > 0 {
        args.push("--force".to_string());
    }

    for port in current.published.iter().filter(|p| !opts.published.contains(p)) {
        args.push("--publish-rm".to_string());
        args.push(port_spec(*port));
    }

    for port in &opts.published {
        args.push("--publish-add".to_string());
        args.push(port_spec(*port));
    }

    for key in current.env_keys.iter().filter(|k| !opts.env.contains_key(*k)) {
        args.push("--env-rm".to_string());
        args.push(key.clone());
    }

    for (key, value) in &opts.env {
        args.push("--env-add".to_string());
        args.push(format!("{key}={value}"));
    }

    for target in &current.mount_targets {
        if !opts.mounts.iter().any(|m| mount_target(m) == target.as_str()) {
            args.push("--mount-rm".to_string());
            args.push(target.clone());
        }
    }

    for mount in &opts.mounts {
        args.push("--mount-add".to_string());
        args.push(mount_spec(mount));
    }

    push_quota(&mut args, "limit", &opts.limits);
    push_quota(&mut args, "reserve", &opts.reservations);
    push_health(&mut args, opts);

    if !opts.cmd.is_empty() {
        args.push("--args".to_string());
        args.push(
            opts.cmd
                .iter()
                .map(|w| shell_quote(w))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }

    args.push(opts.name.clone());
    args
}
