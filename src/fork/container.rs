use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ContainerConfig;
use crate::error::{EmrError, Result};
use crate::fork::ForkBackend;
use crate::model::{ClusterEnv, ClusterSnapshot};
use crate::version;

static CONFLICTING_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"container "(\w+)""#).expect("conflicting container pattern is valid")
});

/// Failure reported by a container runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A container with the requested name already exists.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        container_id: Option<String>,
    },

    #[error("{0}")]
    Other(String),
}

impl From<RuntimeError> for EmrError {
    fn from(e: RuntimeError) -> Self {
        EmrError::Container(e.to_string())
    }
}

/// What to run for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    /// Container port published on a random host port
    pub publish_port: u16,
}

/// The subset of a container runtime API the container driver needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container and return its id.
    async fn run(&self, spec: &ContainerSpec) -> std::result::Result<String, RuntimeError>;

    /// Force-remove a container and its volumes.
    async fn remove(&self, name_or_id: &str) -> std::result::Result<(), RuntimeError>;

    /// Names of the networks a container is attached to.
    async fn networks(&self, container: &str) -> std::result::Result<Vec<String>, RuntimeError>;

    async fn connect(&self, network: &str, container: &str)
        -> std::result::Result<(), RuntimeError>;
}

/// [`ContainerRuntime`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> std::result::Result<String, RuntimeError> {
        tracing::debug!(binary = %self.binary, ?args, "Running container runtime command");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Other(format!("Failed to run {}: {}", self.binary, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        Err(classify(String::from_utf8_lossy(&output.stderr).trim()))
    }
}

/// Map runtime error output onto a [`RuntimeError`].
pub fn classify(stderr: &str) -> RuntimeError {
    if stderr.contains("No such") {
        return RuntimeError::NotFound(stderr.to_string());
    }
    if stderr.contains("Conflict") || stderr.contains("already in use") {
        let ids: Vec<&str> = CONFLICTING_CONTAINER
            .captures_iter(stderr)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        return RuntimeError::Conflict {
            message: stderr.to_string(),
            container_id: match ids.as_slice() {
                [id] => Some(id.to_string()),
                _ => None,
            },
        };
    }
    RuntimeError::Other(stderr.to_string())
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> std::result::Result<String, RuntimeError> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--publish".to_string(),
            spec.publish_port.to_string(),
        ];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());
        self.docker(&args).await
    }

    async fn remove(&self, name_or_id: &str) -> std::result::Result<(), RuntimeError> {
        let args = ["rm", "--force", "--volumes", name_or_id].map(String::from);
        self.docker(&args).await.map(|_| ())
    }

    async fn networks(&self, container: &str) -> std::result::Result<Vec<String>, RuntimeError> {
        let args = [
            "inspect",
            "--format",
            "{{json .NetworkSettings.Networks}}",
            container,
        ]
        .map(String::from);
        let raw = self.docker(&args).await?;
        let networks: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| RuntimeError::Other(format!("Unreadable network settings: {}", e)))?;
        Ok(networks.keys().cloned().collect())
    }

    async fn connect(
        &self,
        network: &str,
        container: &str,
    ) -> std::result::Result<(), RuntimeError> {
        let args = ["network", "connect", network, container].map(String::from);
        self.docker(&args).await.map(|_| ())
    }
}

/// Runs each cluster in its own container, named after the cluster and
/// attached to the network of the anchor container.
pub struct ContainerFork {
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerConfig,
}

impl ContainerFork {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ContainerConfig) -> Self {
        Self { runtime, config }
    }

    /// Image for a cluster: the repository tagged with its runtime version.
    pub fn image_for(&self, cluster: &ClusterSnapshot) -> Result<String> {
        let spark = version::spark_version(&cluster.release_label)?;
        Ok(format!("{}{}", self.config.image_repo, spark))
    }

    async fn anchor_network(&self) -> Result<String> {
        let anchor = &self.config.anchor_container;
        let networks = match self.runtime.networks(anchor).await {
            Ok(networks) => networks,
            Err(RuntimeError::NotFound(_)) => {
                return Err(EmrError::Container(format!(
                    "Container {} not found, most likely the anchor container was renamed \
                     without updating the configuration",
                    anchor
                )))
            }
            Err(e) => return Err(e.into()),
        };
        networks.into_iter().next().ok_or_else(|| {
            EmrError::Container(format!("Container {} is not attached to any network", anchor))
        })
    }

    /// Start the container, removing a stale one holding the same name and retrying once.
    async fn run_replacing_stale(&self, spec: &ContainerSpec) -> Result<String> {
        match self.runtime.run(spec).await {
            Ok(id) => Ok(id),
            Err(RuntimeError::Conflict {
                container_id: Some(stale),
                ..
            }) => {
                tracing::warn!(name = %spec.name, stale = %stale, "Removing stale container");
                self.runtime.remove(&stale).await?;
                Ok(self.runtime.run(spec).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ForkBackend for ContainerFork {
    async fn create(&self, cluster: &ClusterSnapshot) -> Result<ClusterEnv> {
        let network = self.anchor_network().await?;
        let spec = ContainerSpec {
            name: cluster.name.clone(),
            image: self.image_for(cluster)?,
            env: self.config.env.clone(),
            publish_port: self.config.service_port,
        };

        tracing::info!(
            cluster_id = %cluster.id,
            name = %spec.name,
            image = %spec.image,
            "Starting cluster container"
        );
        let container_id = self.run_replacing_stale(&spec).await?;
        self.runtime.connect(&network, &spec.name).await?;
        tracing::info!(
            cluster_id = %cluster.id,
            container_id = %container_id,
            network = %network,
            "Cluster container attached"
        );
        Ok(ClusterEnv::new())
    }

    async fn terminate(&self, cluster: &ClusterSnapshot) -> Result<()> {
        match self.runtime.remove(&cluster.name).await {
            Ok(()) => {
                tracing::info!(cluster_id = %cluster.id, name = %cluster.name, "Cluster container removed");
                Ok(())
            }
            Err(RuntimeError::NotFound(message)) => {
                tracing::warn!(
                    cluster_id = %cluster.id,
                    name = %cluster.name,
                    error = %message,
                    "Container not found, could not remove"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_not_found() {
        let err = classify("Error response from daemon: No such container: c1");
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[test]
    fn classify_name_conflict() {
        let err = classify(
            "docker: Error response from daemon: Conflict. The container name \"/c1\" is already \
             in use by container \"4f2a9c\". You have to remove (or rename) that container.",
        );
        match err {
            RuntimeError::Conflict { container_id, .. } => {
                assert_eq!(container_id.as_deref(), Some("4f2a9c"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_other() {
        assert_eq!(
            classify("permission denied"),
            RuntimeError::Other("permission denied".to_string())
        );
    }
}
