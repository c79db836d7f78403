use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::batch::clean_for_local_run;
use crate::error::{EmrError, Result};
use crate::exec::ExecBackend;
use crate::model::{ClusterEnv, FailureDetails, StepOutcome, StepSnapshot};

/// Runs a step's command line as a local child process, with the cluster's
/// environment layered over this process's.
///
/// stdout and stderr are written line by line to
/// `{log_root}/{cluster_name}/{cluster_id}/steps/{step_id}/{stdout,stderr}.log`.
#[derive(Debug, Clone)]
pub struct SubprocessExec {
    log_root: PathBuf,
}

impl SubprocessExec {
    pub fn new(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
        }
    }

    pub fn log_dir(&self, step: &StepSnapshot) -> PathBuf {
        step_log_dir(&self.log_root, step)
    }
}

pub fn step_log_dir(log_root: &Path, step: &StepSnapshot) -> PathBuf {
    log_root
        .join(&step.cluster_name)
        .join(&step.cluster_id)
        .join("steps")
        .join(&step.id)
}

#[async_trait]
impl ExecBackend for SubprocessExec {
    async fn run(&self, step: &StepSnapshot, env: &ClusterEnv) -> Result<StepOutcome> {
        let command_line = clean_for_local_run(&step.args);
        let Some((program, args)) = command_line.split_first() else {
            return Ok(StepOutcome::failed(
                FailureDetails::new("Unknown Error").with_message("Empty step command line"),
            ));
        };

        let log_dir = self.log_dir(step);
        tokio::fs::create_dir_all(&log_dir).await?;

        tracing::info!(step_id = %step.id, program = %program, log_dir = %log_dir.display(), "Spawning step");

        let mut child = match Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(step_id = %step.id, program = %program, error = %e, "Failed to spawn step");
                let message = format!("Failed to start `{}`: {}", program, e);
                tokio::fs::write(log_dir.join("stderr.log"), format!("{}\n", message)).await?;
                return Ok(StepOutcome::failed(
                    FailureDetails::new("Unknown Error").with_message(message),
                ));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EmrError::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EmrError::Internal("child stderr not captured".to_string()))?;

        let (stdout_res, stderr_res, status) = tokio::join!(
            tee(stdout, log_dir.join("stdout.log"), &step.id, false),
            tee(stderr, log_dir.join("stderr.log"), &step.id, true),
            child.wait(),
        );
        stdout_res?;
        let stderr_text = stderr_res?;
        let status = status?;

        tracing::info!(step_id = %step.id, exit_code = ?status.code(), "Step process exited");

        if status.success() {
            return Ok(StepOutcome::completed());
        }
        let details = if stderr_text.trim().is_empty() {
            FailureDetails::new("Unknown Error")
                .with_message(format!("Exit code: {:?}", status.code()))
        } else {
            FailureDetails::from_log("Unknown Error", &stderr_text)
        };
        Ok(StepOutcome::failed(details))
    }
}

/// Copy `reader` line by line into the file at `path`, returning the text when `capture` is set.
async fn tee<R>(reader: R, path: PathBuf, step_id: &str, capture: bool) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(&path).await?;
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        tracing::debug!(step_id, "{}", line);
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        if capture {
            captured.push_str(&line);
            captured.push('\n');
        }
    }
    file.flush().await?;
    Ok(captured)
}
