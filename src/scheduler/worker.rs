use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::fork::ForkBackend;
use crate::model::{ClusterSnapshot, ClusterState};
use crate::scheduler::cluster_machine::{ClusterMachine, Flow};
use crate::scheduler::queue::WorkerQueues;
use crate::scheduler::step_machine::StepRunner;

/// The orchestration loop of one cluster.
///
/// Each iteration handles at most one item, checked in priority order:
/// 1. a lifecycle action
/// 2. a step, run to completion with the cluster `RUNNING`
/// 3. otherwise the cluster goes back to `WAITING` for a bounded idle sleep
///
/// The loop ends once a termination has been processed. Steps still queued at
/// that point are committed as `CANCELLED`.
pub struct ClusterWorker {
    machine: ClusterMachine,
    runner: Arc<StepRunner>,
    queues: WorkerQueues,
    idle_interval: Duration,
    shutdown: CancellationToken,
    shutdown_handled: bool,
}

impl ClusterWorker {
    pub fn new(
        cluster: ClusterSnapshot,
        fork: Arc<dyn ForkBackend>,
        runner: Arc<StepRunner>,
        queues: WorkerQueues,
        idle_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let machine = ClusterMachine::new(cluster, fork, queues.status.clone());
        Self {
            machine,
            runner,
            queues,
            idle_interval,
            shutdown,
            shutdown_handled: false,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(mut self) -> Result<()> {
        let cluster_id = self.machine.cluster().id.clone();
        tracing::info!(cluster_id = %cluster_id, "Cluster worker started");

        let result = self.run_loop().await;
        self.cancel_pending();

        match &result {
            Ok(()) => {
                tracing::info!(cluster_id = %cluster_id, state = %self.machine.state(), "Cluster worker stopped")
            }
            Err(e) => {
                tracing::error!(cluster_id = %cluster_id, error = %e, "Cluster worker aborted")
            }
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if let Ok(action) = self.queues.actions.try_recv() {
                match self.machine.dispatch(&action).await? {
                    Flow::Exit => return Ok(()),
                    Flow::Continue => {
                        self.terminate_if_idle();
                        continue;
                    }
                }
            }

            if let Ok(step) = self.queues.jobs.try_recv() {
                self.machine.heartbeat(ClusterState::Running);
                self.runner
                    .run(step, self.machine.env(), &self.queues.status)
                    .await;
                self.terminate_if_idle();
                continue;
            }

            self.machine.heartbeat(ClusterState::Waiting);

            if self.shutdown.is_cancelled() {
                if !self.shutdown_handled {
                    self.shutdown_handled = true;
                    tracing::info!(cluster_id = %self.machine.cluster().id, "Shutdown requested, terminating cluster");
                    self.enqueue_termination();
                    continue;
                }
                tokio::time::sleep(self.idle_interval).await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.idle_interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Auto-terminate once the job queue is empty unless the cluster is kept alive.
    fn terminate_if_idle(&mut self) {
        let cluster = self.machine.cluster();
        if cluster.keep_alive_when_no_steps
            || cluster.state.is_terminal()
            || cluster.state == ClusterState::Terminating
            || !self.queues.jobs.is_empty()
        {
            return;
        }
        tracing::info!(cluster_id = %cluster.id, "No steps left, terminating cluster");
        self.enqueue_termination();
    }

    fn enqueue_termination(&mut self) {
        let action = self.machine.begin_termination();
        if self.queues.actions_tx.send(action).is_err() {
            tracing::warn!(cluster_id = %self.machine.cluster().id, "Lifecycle queue closed");
        }
    }

    fn cancel_pending(&mut self) {
        self.queues.jobs.close();
        while let Ok(step) = self.queues.jobs.try_recv() {
            tracing::info!(step_id = %step.id, cluster_id = %step.cluster_id, "Cancelling pending step");
            self.queues.status.commit_step(step.cancelled());
        }
    }
}
