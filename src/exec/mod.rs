//! Execution backends: run one step synchronously and report its outcome.
//!
//! - [`BatchExec`]: translates `spark-submit` steps for an HTTP batch service
//! - [`SubprocessExec`]: runs the step's command line as a child process
//!
//! A graceful job failure is an `Ok` outcome in state `FAILED`. An `Err` means
//! the backend itself could not do its work; the step runner turns it into a
//! failed step.

pub mod batch;
pub mod subprocess;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngineConfig, ExecBackendKind};
use crate::error::Result;
use crate::model::{ClusterEnv, StepOutcome, StepSnapshot};

pub use batch::BatchExec;
pub use subprocess::SubprocessExec;

#[async_trait]
pub trait ExecBackend: Send + Sync {
    /// Check a command line before it is queued.
    fn validate(&self, command_line: &[String]) -> Result<()> {
        let _ = command_line;
        Ok(())
    }

    /// Run `step` to completion with the environment its cluster was provisioned with.
    async fn run(&self, step: &StepSnapshot, env: &ClusterEnv) -> Result<StepOutcome>;
}

/// Build the execution backend selected by `config`.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn ExecBackend>> {
    let backend: Arc<dyn ExecBackend> = match config.exec {
        ExecBackendKind::Batch => {
            Arc::new(BatchExec::new(config.batch.clone(), config.mock_s3.clone())?)
        }
        ExecBackendKind::Subprocess => Arc::new(SubprocessExec::new(config.log_root.clone())),
    };
    tracing::info!(backend = ?config.exec, "Execution backend selected");
    Ok(backend)
}
