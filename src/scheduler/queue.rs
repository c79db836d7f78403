use tokio::sync::mpsc;

use crate::model::{ClusterSnapshot, ClusterUpdate, StepSnapshot};

/// Engine side of one cluster's queues.
///
/// Actions and jobs flow to the worker; status commits flow back and are
/// folded into the engine's view when it next reads the cluster.
#[derive(Debug)]
pub struct ClusterQueues {
    pub actions: mpsc::UnboundedSender<ClusterSnapshot>,
    pub jobs: mpsc::UnboundedSender<StepSnapshot>,
    pub cluster_status: mpsc::UnboundedReceiver<ClusterUpdate>,
    pub step_status: mpsc::UnboundedReceiver<StepSnapshot>,
}

/// Worker side of one cluster's queues.
#[derive(Debug)]
pub struct WorkerQueues {
    /// Lets the worker enqueue its own termination
    pub actions_tx: mpsc::UnboundedSender<ClusterSnapshot>,
    pub actions: mpsc::UnboundedReceiver<ClusterSnapshot>,
    pub jobs: mpsc::UnboundedReceiver<StepSnapshot>,
    pub status: StatusChannel,
}

/// Append-only status commits from a worker.
#[derive(Debug, Clone)]
pub struct StatusChannel {
    cluster: mpsc::UnboundedSender<ClusterUpdate>,
    step: mpsc::UnboundedSender<StepSnapshot>,
}

impl StatusChannel {
    pub fn commit_cluster(&self, update: ClusterUpdate) {
        tracing::debug!(state = %update.state, "Cluster status committed");
        if self.cluster.send(update).is_err() {
            tracing::debug!("Cluster status reader is gone");
        }
    }

    pub fn commit_step(&self, step: StepSnapshot) {
        tracing::debug!(step_id = %step.id, state = %step.state, "Step status committed");
        if self.step.send(step).is_err() {
            tracing::debug!("Step status reader is gone");
        }
    }
}

/// Create the queues shared by the engine and one cluster worker.
pub fn cluster_queues() -> (ClusterQueues, WorkerQueues) {
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let (cluster_tx, cluster_rx) = mpsc::unbounded_channel();
    let (step_tx, step_rx) = mpsc::unbounded_channel();

    let engine = ClusterQueues {
        actions: actions_tx.clone(),
        jobs: jobs_tx,
        cluster_status: cluster_rx,
        step_status: step_rx,
    };
    let worker = WorkerQueues {
        actions_tx,
        actions: actions_rx,
        jobs: jobs_rx,
        status: StatusChannel {
            cluster: cluster_tx,
            step: step_tx,
        },
    };
    (engine, worker)
}
