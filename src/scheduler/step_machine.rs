use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::exec::ExecBackend;
use crate::model::{ClusterEnv, FailureDetails, StepOutcome, StepSnapshot};
use crate::scheduler::queue::StatusChannel;
use crate::staging::CommandRewriter;

/// Drives one step from `RUNNING` to a terminal state.
pub struct StepRunner {
    exec: Arc<dyn ExecBackend>,
    rewriter: Arc<dyn CommandRewriter>,
}

impl StepRunner {
    pub fn new(exec: Arc<dyn ExecBackend>, rewriter: Arc<dyn CommandRewriter>) -> Self {
        Self { exec, rewriter }
    }

    /// Check a step's command line the way the backend will see it.
    pub fn validate(&self, command_line: &[String]) -> Result<()> {
        self.exec.validate(&self.rewriter.rewrite(command_line))
    }

    /// Run `step`, committing `RUNNING` and then its terminal record.
    ///
    /// Never fails: backend errors and panics become a `FAILED` step.
    pub async fn run(
        &self,
        step: StepSnapshot,
        env: &ClusterEnv,
        status: &StatusChannel,
    ) -> StepSnapshot {
        let running = step.started();
        status.commit_step(running.clone());
        tracing::info!(step_id = %running.id, cluster_id = %running.cluster_id, name = %running.name, "Step started");

        let outcome = self.execute(&running, env).await;
        let finished = running.finished(outcome);
        tracing::info!(step_id = %finished.id, state = %finished.state, "Step finished");
        status.commit_step(finished.clone());
        finished
    }

    async fn execute(&self, step: &StepSnapshot, env: &ClusterEnv) -> StepOutcome {
        let mut rewritten = step.clone();
        rewritten.args = self.rewriter.rewrite(&step.args);

        let exec = self.exec.clone();
        let env = env.clone();
        let handle = tokio::spawn(async move { exec.run(&rewritten, &env).await });

        match handle.await {
            Ok(Ok(outcome)) if outcome.state.is_terminal() => outcome,
            Ok(Ok(outcome)) => {
                tracing::error!(step_id = %step.id, state = %outcome.state, "Execution backend returned a non-terminal state");
                unknown_failure(format!(
                    "Execution backend returned non-terminal state {}",
                    outcome.state
                ))
            }
            Ok(Err(e)) => {
                tracing::error!(step_id = %step.id, error = %e, "Execution backend failed");
                unknown_failure(e.chain())
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(step_id = %step.id, panic = %message, "Execution backend panicked");
                unknown_failure(message)
            }
            Err(e) => {
                tracing::error!(step_id = %step.id, error = %e, "Execution task was cancelled");
                unknown_failure(e.to_string())
            }
        }
    }
}

fn unknown_failure(message: String) -> StepOutcome {
    StepOutcome::failed(FailureDetails::new("Unknown Reason").with_message(message))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic with non-string payload".to_string()
}
