//! Missions of the framework's own workload kinds.

use super::Mission;
use crate::cargo::Cargo;
use crate::constants::{
    ENTRYPOINT, ENV_CONTAINER_PURPOSE, ENV_OPEN_SEA, INFERENCE_PORT, NOTEBOOK_HOST_PORT,
    NOTEBOOK_PORT, SECTION_DEPL, SECTION_IDE, SECTION_TRAIN,
};
use serde_json::Value;
use std::collections::BTreeMap;

fn entrypoint(args: Vec<String>, debug: bool) -> Vec<String> {
    let mut cmd = vec![ENTRYPOINT.to_string()];
    cmd.extend(args);
    if debug {
        cmd.push("--debug".to_string());
    }
    cmd
}

// =============================================================================
// Notebook
// =============================================================================

/// Interactive notebook server for a project.
#[derive(Debug, Clone)]
pub struct NotebookMission {
    project: String,
    port: u16,
    documents: Vec<(String, String)>,
}

impl NotebookMission {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            port: NOTEBOOK_HOST_PORT,
            documents: Vec::new(),
        }
    }

    /// Host port the notebook is published on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_documents(mut self, documents: Vec<(String, String)>) -> Self {
        self.documents = documents;
        self
    }
}

impl Mission for NotebookMission {
    fn section(&self) -> &'static str {
        SECTION_IDE
    }

    fn make_alias(&self) -> String {
        self.project.clone()
    }

    fn make_cmd(&self, debug: bool) -> Vec<String> {
        entrypoint(Vec::new(), debug)
    }

    fn make_ports(&self) -> Vec<String> {
        vec![format!("{}:{NOTEBOOK_PORT}", self.port)]
    }

    fn documents(&self) -> Vec<(String, String)> {
        self.documents.clone()
    }
}

// =============================================================================
// Training
// =============================================================================

/// Headless execution of a notebook with parameters.
#[derive(Debug, Clone)]
pub struct TrainingMission {
    project: String,
    training: String,
    notebook: String,
    params: Value,
    datasets: Vec<Cargo>,
    documents: Vec<(String, String)>,
}

impl TrainingMission {
    pub fn new(
        project: impl Into<String>,
        training: impl Into<String>,
        notebook: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            project: project.into(),
            training: training.into(),
            notebook: notebook.into(),
            params,
            datasets: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Dataset cargos mounted into the shared volume.
    pub fn with_datasets(mut self, datasets: Vec<Cargo>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn with_documents(mut self, documents: Vec<(String, String)>) -> Self {
        self.documents = documents;
        self
    }
}

impl Mission for TrainingMission {
    fn section(&self) -> &'static str {
        SECTION_TRAIN
    }

    fn make_alias(&self) -> String {
        format!("{}-{}", self.project, self.training)
    }

    fn make_cmd(&self, debug: bool) -> Vec<String> {
        entrypoint(
            vec![
                "--notebook-path".to_string(),
                self.notebook.clone(),
                "--params".to_string(),
                self.params.to_string(),
            ],
            debug,
        )
    }

    fn documents(&self) -> Vec<(String, String)> {
        self.documents.clone()
    }

    fn heavy_cargos(&self) -> Vec<Cargo> {
        self.datasets.clone()
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Online inference server over one or more model versions.
#[derive(Debug, Clone)]
pub struct DeploymentMission {
    project: String,
    deployment: String,
    notebook: String,
    params: Value,
    port: Option<u16>,
    movers: Vec<Cargo>,
    documents: Vec<(String, String)>,
}

impl DeploymentMission {
    pub fn new(
        project: impl Into<String>,
        deployment: impl Into<String>,
        notebook: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            deployment: deployment.into(),
            notebook: notebook.into(),
            params: Value::Object(Default::default()),
            port: None,
            movers: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Node port to publish; without one the port is only referenced.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Model version cargos mounted into the shared volume.
    pub fn with_movers(mut self, movers: Vec<Cargo>) -> Self {
        self.movers = movers;
        self
    }

    pub fn with_documents(mut self, documents: Vec<(String, String)>) -> Self {
        self.documents = documents;
        self
    }
}

impl Mission for DeploymentMission {
    fn section(&self) -> &'static str {
        SECTION_DEPL
    }

    fn make_alias(&self) -> String {
        format!("{}-{}", self.project, self.deployment)
    }

    fn make_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_CONTAINER_PURPOSE.to_string(), SECTION_DEPL.to_string()),
            (ENV_OPEN_SEA.to_string(), "Yes".to_string()),
        ])
    }

    fn make_cmd(&self, debug: bool) -> Vec<String> {
        entrypoint(
            vec![
                "--notebook-path".to_string(),
                self.notebook.clone(),
                "--params".to_string(),
                self.params.to_string(),
            ],
            debug,
        )
    }

    fn make_ports(&self) -> Vec<String> {
        match self.port {
            Some(port) => vec![format!("{port}:{INFERENCE_PORT}")],
            None => vec![INFERENCE_PORT.to_string()],
        }
    }

    fn documents(&self) -> Vec<(String, String)> {
        self.documents.clone()
    }

    fn heavy_cargos(&self) -> Vec<Cargo> {
        self.movers.clone()
    }

    fn allow_probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notebook_ports_and_cmd() {
        let mission = NotebookMission::new("iris").with_port(30001);
        assert_eq!(mission.make_ports(), vec!["30001:8888"]);
        assert_eq!(mission.make_cmd(true), vec!["/entrypoint.sh", "--debug"]);
    }

    #[test]
    fn test_training_cmd_carries_params() {
        let mission = TrainingMission::new("iris", "exp1", "train.ipynb", json!({"lr": 0.1}));
        let cmd = mission.make_cmd(false);

        assert_eq!(mission.make_alias(), "iris-exp1");
        assert_eq!(cmd[1..3], ["--notebook-path", "train.ipynb"]);
        assert_eq!(cmd[4], r#"{"lr":0.1}"#);
    }

    #[test]
    fn test_deployment_bare_port_without_node_port() {
        let mission = DeploymentMission::new("iris", "prod", "predict.ipynb");
        assert_eq!(mission.make_ports(), vec!["8080"]);
        assert_eq!(mission.make_env_vars()["IS_IT_OPEN_SEA"], "Yes");
    }
}
