//! Per-cluster orchestration.
//!
//! Every cluster gets one [`ClusterWorker`] task and a private set of queues:
//! lifecycle actions and jobs flow in, status commits flow out. Steps of one
//! cluster run strictly one at a time in submission order; workers of
//! different clusters share nothing.

pub mod cluster_machine;
pub mod queue;
pub mod step_machine;
pub mod worker;

pub use cluster_machine::{ClusterMachine, Flow};
pub use queue::{cluster_queues, ClusterQueues, StatusChannel, WorkerQueues};
pub use step_machine::StepRunner;
pub use worker::ClusterWorker;
