//! Provisioning backends: bring a cluster's runtime up and tear it down.
//!
//! - [`ContainerFork`]: one container per cluster on the anchor container's network
//! - [`LocalFetchFork`]: a downloaded runtime distribution put on the steps' search path
//!
//! Backends only do the provisioning work. The cluster state machine commits
//! the resulting status, including `TERMINATED_WITH_ERRORS` when a backend
//! returns an error.

pub mod container;
pub mod local_fetch;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngineConfig, ForkBackendKind};
use crate::error::Result;
use crate::model::{ClusterEnv, ClusterSnapshot};

pub use container::{ContainerFork, ContainerRuntime, ContainerSpec, DockerCli, RuntimeError};
pub use local_fetch::LocalFetchFork;

#[async_trait]
pub trait ForkBackend: Send + Sync {
    /// Provision the runtime for `cluster` and return the environment its
    /// steps run with. Safe to call again after a failure.
    async fn create(&self, cluster: &ClusterSnapshot) -> Result<ClusterEnv>;

    /// Release whatever `create` provisioned. Already-released resources are not an error.
    async fn terminate(&self, cluster: &ClusterSnapshot) -> Result<()>;
}

/// Build the provisioning backend selected by `config`.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn ForkBackend>> {
    let backend: Arc<dyn ForkBackend> = match config.fork {
        ForkBackendKind::Container => Arc::new(ContainerFork::new(
            Arc::new(DockerCli::default()),
            config.container.clone(),
        )),
        ForkBackendKind::LocalFetch => Arc::new(LocalFetchFork::new(config.fetch.clone())?),
    };
    tracing::info!(backend = ?config.fork, "Provisioning backend selected");
    Ok(backend)
}
