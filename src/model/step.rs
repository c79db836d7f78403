use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::cluster::ClusterSnapshot;
use crate::model::random_id;

/// Jars that run their first argument as a program rather than being a program themselves.
pub const SCRIPT_RUNNERS: &[&str] = &["command-runner.jar", "script-runner.jar"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Cancelled | StepState::Interrupted
        )
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::Pending => write!(f, "PENDING"),
            StepState::Running => write!(f, "RUNNING"),
            StepState::Completed => write!(f, "COMPLETED"),
            StepState::Failed => write!(f, "FAILED"),
            StepState::Cancelled => write!(f, "CANCELLED"),
            StepState::Interrupted => write!(f, "INTERRUPTED"),
        }
    }
}

/// Why a step ended in a failed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureDetails {
    pub reason: Option<String>,
    pub message: Option<String>,
    pub log_file: Option<String>,
}

impl FailureDetails {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            message: None,
            log_file: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log_file = Some(log.into());
        self
    }

    /// Build details from a log excerpt, using its most telling line as the message.
    pub fn from_log(reason: impl Into<String>, log: &str) -> Self {
        let details = Self::new(reason).with_log(log);
        match summarize_log(log) {
            Some(line) => details.with_message(line),
            None => details,
        }
    }
}

/// Pick the last line mentioning an exception or error, else the last non-empty line.
pub fn summarize_log(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| {
            let lower = l.to_ascii_lowercase();
            lower.contains("exception") || lower.contains("error")
        })
        .or_else(|| lines.last())
        .map(|l| l.to_string())
}

/// Terminal result reported by an execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: StepState,
    pub failure: Option<FailureDetails>,
}

impl StepOutcome {
    pub fn completed() -> Self {
        Self {
            state: StepState::Completed,
            failure: None,
        }
    }

    pub fn failed(details: FailureDetails) -> Self {
        Self {
            state: StepState::Failed,
            failure: Some(details),
        }
    }
}

/// A step as submitted by a caller: a jar plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub jar: String,
    pub main_class: Option<String>,
    pub args: Vec<String>,
}

impl StepSpec {
    /// A step that runs `args` through `command-runner.jar`.
    pub fn command(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            jar: "command-runner.jar".to_string(),
            main_class: None,
            args,
        }
    }

    /// The command line this step runs.
    ///
    /// Script-runner steps run their arguments; the program is reduced to its
    /// basename when the given path does not exist here. Any other jar is run
    /// through `hadoop jar`.
    pub fn command_line(&self) -> Vec<String> {
        if SCRIPT_RUNNERS.contains(&self.jar.as_str()) {
            let mut args = self.args.clone();
            if let Some(program) = args.first_mut() {
                *program = basename_if_missing(program);
            }
            return args;
        }

        let mut line = vec!["hadoop".to_string(), "jar".to_string(), self.jar.clone()];
        line.extend(self.main_class.iter().cloned());
        line.extend(self.args.iter().cloned());
        line
    }
}

fn basename_if_missing(program: &str) -> String {
    let path = Path::new(program);
    if path.exists() || path.is_symlink() {
        return program.to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Immutable record of a step at one point of its lifecycle.
///
/// Transitions return a new record; the previous one is never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    pub cluster_id: String,
    pub cluster_name: String,
    pub name: String,
    /// Host the step's execution backend contacts
    pub host: String,
    pub args: Vec<String>,
    pub state: StepState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureDetails>,
}

impl StepSnapshot {
    pub fn pending(cluster: &ClusterSnapshot, spec: &StepSpec, host: impl Into<String>) -> Self {
        Self {
            id: random_id("s-"),
            cluster_id: cluster.id.clone(),
            cluster_name: cluster.name.clone(),
            name: spec.name.clone(),
            host: host.into(),
            args: spec.command_line(),
            state: StepState::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            failure: None,
        }
    }

    pub fn started(&self) -> Self {
        Self {
            state: StepState::Running,
            started_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn finished(&self, outcome: StepOutcome) -> Self {
        Self {
            state: outcome.state,
            failure: outcome.failure,
            ended_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn cancelled(&self) -> Self {
        Self {
            state: StepState::Cancelled,
            ended_at: Some(Utc::now()),
            ..self.clone()
        }
    }
}
