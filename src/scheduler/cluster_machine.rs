use std::sync::Arc;

use chrono::Utc;

use crate::error::{EmrError, Result};
use crate::fork::ForkBackend;
use crate::model::{ClusterEnv, ClusterSnapshot, ClusterState, ClusterUpdate};
use crate::scheduler::queue::StatusChannel;

/// What the worker does after a lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Applies lifecycle actions to one cluster and commits every transition.
///
/// Every path through [`ClusterMachine::dispatch`] that reaches the
/// provisioning backend commits a final status, including on backend errors.
pub struct ClusterMachine {
    cluster: ClusterSnapshot,
    env: ClusterEnv,
    fork: Arc<dyn ForkBackend>,
    status: StatusChannel,
}

impl ClusterMachine {
    pub fn new(cluster: ClusterSnapshot, fork: Arc<dyn ForkBackend>, status: StatusChannel) -> Self {
        Self {
            cluster,
            env: ClusterEnv::new(),
            fork,
            status,
        }
    }

    /// The worker's current view of the cluster.
    pub fn cluster(&self) -> &ClusterSnapshot {
        &self.cluster
    }

    /// Environment returned by the provisioning backend, empty until started.
    pub fn env(&self) -> &ClusterEnv {
        &self.env
    }

    pub fn state(&self) -> ClusterState {
        self.cluster.state
    }

    /// Dispatch a lifecycle action. The action's state names the transition.
    pub async fn dispatch(&mut self, action: &ClusterSnapshot) -> Result<Flow> {
        match action.state {
            ClusterState::Starting => self.start().await,
            ClusterState::Terminating => self.terminate().await,
            other => Err(EmrError::InvariantViolation(format!(
                "Cluster {} received lifecycle action {}; only {} and {} are valid",
                self.cluster.id,
                other,
                ClusterState::Starting,
                ClusterState::Terminating
            ))),
        }
    }

    /// Commit a move between `WAITING` and `RUNNING`. Repeating the current
    /// state commits nothing.
    pub fn heartbeat(&mut self, state: ClusterState) {
        if self.cluster.state != state
            && matches!(
                self.cluster.state,
                ClusterState::Waiting | ClusterState::Running
            )
        {
            self.commit(ClusterUpdate::heartbeat(state));
        }
    }

    /// Commit `TERMINATING` and return the matching lifecycle action.
    pub fn begin_termination(&mut self) -> ClusterSnapshot {
        if self.cluster.state != ClusterState::Terminating {
            self.commit(ClusterUpdate::heartbeat(ClusterState::Terminating));
        }
        self.cluster.with_state(ClusterState::Terminating)
    }

    async fn start(&mut self) -> Result<Flow> {
        if self.cluster.state.is_terminal() {
            tracing::warn!(cluster_id = %self.cluster.id, state = %self.cluster.state, "Ignoring start of a finished cluster");
            return Ok(Flow::Exit);
        }

        self.commit(ClusterUpdate {
            started_at: Some(Utc::now()),
            ..ClusterUpdate::heartbeat(ClusterState::Starting)
        });

        match self.fork.create(&self.cluster).await {
            Ok(env) => self.env = env,
            Err(e) => {
                tracing::error!(cluster_id = %self.cluster.id, error = %e, "Cluster provisioning failed");
                self.commit(ClusterUpdate {
                    ended_at: Some(Utc::now()),
                    reason: Some(e.to_string()),
                    ..ClusterUpdate::heartbeat(ClusterState::TerminatedWithErrors)
                });
                return Ok(Flow::Exit);
            }
        }

        self.commit(ClusterUpdate::heartbeat(ClusterState::Bootstrapping));
        self.commit(ClusterUpdate {
            ready_at: Some(Utc::now()),
            ..ClusterUpdate::heartbeat(ClusterState::Waiting)
        });
        tracing::info!(cluster_id = %self.cluster.id, name = %self.cluster.name, "Cluster ready");
        Ok(Flow::Continue)
    }

    async fn terminate(&mut self) -> Result<Flow> {
        if self.cluster.state.is_terminal() {
            tracing::debug!(cluster_id = %self.cluster.id, "Cluster already terminated");
            return Ok(Flow::Exit);
        }
        if self.cluster.state != ClusterState::Terminating {
            self.commit(ClusterUpdate::heartbeat(ClusterState::Terminating));
        }

        let update = match self.fork.terminate(&self.cluster).await {
            Ok(()) => ClusterUpdate {
                ended_at: Some(Utc::now()),
                ..ClusterUpdate::heartbeat(ClusterState::Terminated)
            },
            Err(e) => {
                tracing::error!(cluster_id = %self.cluster.id, error = %e, "Cluster teardown failed");
                ClusterUpdate {
                    ended_at: Some(Utc::now()),
                    reason: Some(e.to_string()),
                    ..ClusterUpdate::heartbeat(ClusterState::TerminatedWithErrors)
                }
            }
        };
        self.commit(update);
        tracing::info!(cluster_id = %self.cluster.id, state = %self.cluster.state, "Cluster terminated");
        Ok(Flow::Exit)
    }

    fn commit(&mut self, update: ClusterUpdate) {
        self.cluster.apply(&update);
        self.status.commit_cluster(update);
    }
}
