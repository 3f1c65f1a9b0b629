//! Cluster API over the `kubectl` command line.

use super::orchestrator::{ClusterApi, PodStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Drives one namespace of the cluster through `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlCli {
    program: String,
    namespace: String,
}

impl KubectlCli {
    pub fn new(namespace: &str) -> Self {
        Self {
            program: "kubectl".to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn base_args(&self, args: &[&str]) -> Vec<String> {
        let mut all = vec!["--namespace".to_string(), self.namespace.clone()];
        all.extend(args.iter().map(|s| s.to_string()));
        all
    }

    async fn kubectl(&self, operation: &str, args: Vec<String>, stdin: Option<&[u8]>) -> Result<String> {
        debug!(program = %self.program, ?args, "Invoking cluster CLI");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = command
            .spawn()
            .map_err(|e| Error::cluster(operation, format!("cannot invoke {}: {e}", self.program)))?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input).await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::cluster(operation, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn apply_manifest(&self, verb: &str, manifest: &Value) -> Result<()> {
        let body = serde_json::to_vec(manifest)?;
        let kind = manifest["kind"].as_str().unwrap_or("object").to_lowercase();

        self.kubectl(
            &format!("{verb} {kind}"),
            self.base_args(&[verb, "-f", "-"]),
            Some(body.as_slice()),
        )
        .await
        .map(drop)
    }
}

#[async_trait]
impl ClusterApi for KubectlCli {
    async fn namespace_exists(&self) -> Result<bool> {
        let out = self
            .kubectl(
                "find namespace",
                vec![
                    "get".to_string(),
                    "namespace".to_string(),
                    self.namespace.clone(),
                    "--ignore-not-found".to_string(),
                    "-o".to_string(),
                    "name".to_string(),
                ],
                None,
            )
            .await?;

        Ok(!out.trim().is_empty())
    }

    async fn get(&self, kind: &str, name: &str) -> Result<Option<Value>> {
        let out = self
            .kubectl(
                &format!("get {kind}"),
                self.base_args(&["get", kind, name, "--ignore-not-found", "-o", "json"]),
                None,
            )
            .await?;

        if out.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&out)?))
    }

    async fn create(&self, manifest: &Value) -> Result<()> {
        self.apply_manifest("create", manifest).await
    }

    async fn replace(&self, manifest: &Value) -> Result<()> {
        self.apply_manifest("replace", manifest).await
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<()> {
        self.kubectl(
            &format!("delete {kind}"),
            self.base_args(&[
                "delete",
                kind,
                name,
                "--ignore-not-found",
                "--grace-period=0",
                "--wait=false",
            ]),
            None,
        )
        .await
        .map(drop)
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodStatus>> {
        let out = self
            .kubectl(
                "list pods",
                self.base_args(&["get", "pods", "-l", selector, "-o", "json"]),
                None,
            )
            .await?;

        let list: Value = serde_json::from_str(&out)?;
        Ok(list["items"]
            .as_array()
            .map(|items| items.iter().map(PodStatus::from_manifest).collect())
            .unwrap_or_default())
    }

    async fn exec(&self, pod: &str, cmd: &[String]) -> Result<String> {
        let mut args = self.base_args(&["exec", pod, "--container", pod, "--"]);
        args.extend(cmd.iter().cloned());
        self.kubectl("exec in pod", args, None).await
    }

    async fn copy_to(&self, src: &Path, pod: &str, dest: &str) -> Result<()> {
        let src = src.display().to_string();
        let target = format!("{pod}:{dest}");
        let args = self.base_args(&["cp", &src, &target, "--container", pod]);
        self.kubectl("copy into pod", args, None).await.map(drop)
    }

    async fn stream_logs(&self, pod: &str, container: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(self.base_args(&["logs", "--follow", pod, "--container", container]))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::cluster("stream logs", e.to_string()))?;

        if !status.success() {
            return Err(Error::cluster(
                "stream logs",
                format!("log stream of '{pod}' ended with {status}"),
            ));
        }

        Ok(())
    }
}
