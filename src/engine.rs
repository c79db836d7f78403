use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EmrError, Result};
use crate::exec::{self, ExecBackend};
use crate::fork::{self, ForkBackend};
use crate::model::{ClusterSnapshot, ClusterSpec, ClusterState, StepSnapshot, StepSpec};
use crate::scheduler::{cluster_queues, ClusterQueues, ClusterWorker, StepRunner};
use crate::{staging, version};

/// Engine-side record of one cluster and its worker.
struct ClusterEntry {
    snapshot: ClusterSnapshot,
    steps: Vec<StepSnapshot>,
    queues: ClusterQueues,
    worker: Option<JoinHandle<Result<()>>>,
    terminate_requested: bool,
}

impl ClusterEntry {
    /// Fold every pending status commit into the engine's view, in commit order.
    fn reconcile(&mut self) {
        while let Ok(update) = self.queues.cluster_status.try_recv() {
            self.snapshot.apply(&update);
        }
        while let Ok(step) = self.queues.step_status.try_recv() {
            match self.steps.iter_mut().find(|s| s.id == step.id) {
                Some(slot) => *slot = step,
                None => self.steps.push(step),
            }
        }
    }

    fn accepts_steps(&self) -> bool {
        !self.terminate_requested
            && !self.snapshot.state.is_terminal()
            && self.snapshot.state != ClusterState::Terminating
    }

    /// Record `step` and hand it to the worker. A step the worker can no
    /// longer receive is recorded as `CANCELLED`.
    fn enqueue(&mut self, step: StepSnapshot) -> StepSnapshot {
        let recorded = match self.queues.jobs.send(step.clone()) {
            Ok(()) => step,
            Err(_) => {
                tracing::warn!(step_id = %step.id, "Cluster worker stopped, cancelling step");
                step.cancelled()
            }
        };
        self.steps.push(recorded.clone());
        recorded
    }
}

/// Facade used by the control plane: owns the cluster workers and reads
/// their state back on demand.
pub struct Engine {
    config: EngineConfig,
    fork: Arc<dyn ForkBackend>,
    runner: Arc<StepRunner>,
    clusters: Arc<RwLock<HashMap<String, ClusterEntry>>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build an engine with the backends selected by `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let fork = fork::from_config(&config)?;
        let exec = exec::from_config(&config)?;
        Ok(Self::with_backends(config, fork, exec))
    }

    pub fn with_backends(
        config: EngineConfig,
        fork: Arc<dyn ForkBackend>,
        exec: Arc<dyn ExecBackend>,
    ) -> Self {
        let rewriter = staging::from_config(&config);
        Self {
            config,
            fork,
            runner: Arc::new(StepRunner::new(exec, rewriter)),
            clusters: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `spec`, start its worker and queue its steps.
    pub async fn create_cluster(&self, spec: ClusterSpec) -> Result<ClusterSnapshot> {
        if self.shutdown.is_cancelled() {
            return Err(EmrError::Validation("Engine is shutting down".to_string()));
        }
        let release = version::resolve(&spec.release_label)?;
        let cluster = ClusterSnapshot::new(&spec);
        let steps = self.prepare_steps(&cluster, &spec.steps)?;

        let (queues, worker_queues) = cluster_queues();
        queues
            .actions
            .send(cluster.clone())
            .map_err(|_| EmrError::Internal("lifecycle queue closed".to_string()))?;

        let mut entry = ClusterEntry {
            snapshot: cluster.clone(),
            steps: Vec::with_capacity(steps.len()),
            queues,
            worker: None,
            terminate_requested: false,
        };
        for step in steps {
            entry.enqueue(step);
        }

        let worker = ClusterWorker::new(
            cluster.clone(),
            self.fork.clone(),
            self.runner.clone(),
            worker_queues,
            self.config.idle_interval(),
            self.shutdown.child_token(),
        );
        entry.worker = Some(worker.spawn());

        tracing::info!(
            cluster_id = %cluster.id,
            name = %cluster.name,
            release = release.release,
            spark = release.spark,
            steps = entry.steps.len(),
            "Cluster created"
        );
        self.clusters.write().await.insert(cluster.id.clone(), entry);
        Ok(cluster)
    }

    /// Queue `steps` on a running cluster. The request is rejected as a whole
    /// if any step fails validation.
    pub async fn add_steps(
        &self,
        cluster_id: &str,
        steps: Vec<StepSpec>,
    ) -> Result<Vec<StepSnapshot>> {
        let mut clusters = self.clusters.write().await;
        let entry = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| EmrError::ClusterNotFound(cluster_id.to_string()))?;
        entry.reconcile();

        if !entry.accepts_steps() {
            return Err(EmrError::Validation(format!(
                "Cluster {} is {}, steps can no longer be added",
                cluster_id, entry.snapshot.state
            )));
        }

        let prepared = self.prepare_steps(&entry.snapshot, &steps)?;
        let added: Vec<StepSnapshot> = prepared.into_iter().map(|s| entry.enqueue(s)).collect();
        tracing::info!(cluster_id, count = added.len(), "Steps added");
        Ok(added)
    }

    /// Request teardown. Terminating a finished cluster does nothing.
    pub async fn terminate_cluster(&self, cluster_id: &str) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        let entry = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| EmrError::ClusterNotFound(cluster_id.to_string()))?;
        entry.reconcile();

        if entry.terminate_requested || entry.snapshot.state.is_terminal() {
            tracing::debug!(cluster_id, state = %entry.snapshot.state, "Termination already requested");
            return Ok(());
        }
        entry.terminate_requested = true;

        let action = entry.snapshot.with_state(ClusterState::Terminating);
        if entry.queues.actions.send(action).is_err() {
            tracing::warn!(cluster_id, "Cluster worker already stopped");
        }
        tracing::info!(cluster_id, "Cluster termination requested");
        Ok(())
    }

    /// Current cluster record and its steps in submission order.
    pub async fn describe_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<(ClusterSnapshot, Vec<StepSnapshot>)> {
        let mut clusters = self.clusters.write().await;
        let entry = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| EmrError::ClusterNotFound(cluster_id.to_string()))?;
        entry.reconcile();
        Ok((entry.snapshot.clone(), entry.steps.clone()))
    }

    /// Every known cluster, oldest first.
    pub async fn list_clusters(&self) -> Vec<ClusterSnapshot> {
        let mut clusters = self.clusters.write().await;
        let mut all: Vec<ClusterSnapshot> = clusters
            .values_mut()
            .map(|entry| {
                entry.reconcile();
                entry.snapshot.clone()
            })
            .collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    /// Terminate every live cluster and wait for all workers to stop.
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.shutdown.cancel();

        let workers: Vec<(String, JoinHandle<Result<()>>)> = {
            let mut clusters = self.clusters.write().await;
            clusters
                .iter_mut()
                .filter_map(|(id, entry)| entry.worker.take().map(|w| (id.clone(), w)))
                .collect()
        };

        for (cluster_id, worker) in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(cluster_id = %cluster_id, error = %e, "Cluster worker ended with error")
                }
                Err(e) => {
                    tracing::error!(cluster_id = %cluster_id, error = %e, "Cluster worker panicked")
                }
            }
        }

        let mut clusters = self.clusters.write().await;
        for entry in clusters.values_mut() {
            entry.reconcile();
        }
        tracing::info!(clusters = clusters.len(), "Engine stopped");
    }

    fn step_host(&self, cluster: &ClusterSnapshot) -> String {
        self.config
            .emr_host
            .clone()
            .unwrap_or_else(|| cluster.name.clone())
    }

    fn prepare_steps(
        &self,
        cluster: &ClusterSnapshot,
        specs: &[StepSpec],
    ) -> Result<Vec<StepSnapshot>> {
        let host = self.step_host(cluster);
        specs
            .iter()
            .map(|spec| {
                let step = StepSnapshot::pending(cluster, spec, host.clone());
                self.runner.validate(&step.args)?;
                Ok(step)
            })
            .collect()
    }
}
