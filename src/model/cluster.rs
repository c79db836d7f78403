use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::random_id;
use crate::model::step::StepSpec;

/// Environment variables a provisioned cluster sets for its steps.
pub type ClusterEnv = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Starting,
    Bootstrapping,
    Waiting,
    Running,
    Terminating,
    Terminated,
    TerminatedWithErrors,
}

impl ClusterState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClusterState::Terminated | ClusterState::TerminatedWithErrors
        )
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Starting => write!(f, "STARTING"),
            ClusterState::Bootstrapping => write!(f, "BOOTSTRAPPING"),
            ClusterState::Waiting => write!(f, "WAITING"),
            ClusterState::Running => write!(f, "RUNNING"),
            ClusterState::Terminating => write!(f, "TERMINATING"),
            ClusterState::Terminated => write!(f, "TERMINATED"),
            ClusterState::TerminatedWithErrors => write!(f, "TERMINATED_WITH_ERRORS"),
        }
    }
}

/// A cluster creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub release_label: String,
    pub keep_alive_when_no_steps: bool,
    pub steps: Vec<StepSpec>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>, release_label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release_label: release_label.into(),
            keep_alive_when_no_steps: false,
            steps: Vec::new(),
        }
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive_when_no_steps = keep_alive;
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }
}

/// Immutable record of a cluster at one point of its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub id: String,
    pub name: String,
    pub release_label: String,
    pub keep_alive_when_no_steps: bool,
    pub state: ClusterState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state_change_reason: Option<String>,
}

impl ClusterSnapshot {
    pub fn new(spec: &ClusterSpec) -> Self {
        Self {
            id: random_id("j-"),
            name: spec.name.clone(),
            release_label: spec.release_label.clone(),
            keep_alive_when_no_steps: spec.keep_alive_when_no_steps,
            state: ClusterState::Starting,
            created_at: Utc::now(),
            started_at: None,
            ready_at: None,
            ended_at: None,
            state_change_reason: None,
        }
    }

    /// Copy of this record carrying another state, used as a lifecycle action.
    pub fn with_state(&self, state: ClusterState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Fold a committed update into this record. Fields the update leaves empty are kept.
    pub fn apply(&mut self, update: &ClusterUpdate) {
        self.state = update.state;
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.ready_at.is_some() {
            self.ready_at = update.ready_at;
        }
        if update.ended_at.is_some() {
            self.ended_at = update.ended_at;
        }
        if update.reason.is_some() {
            self.state_change_reason = update.reason.clone();
        }
    }
}

/// A status commit for a cluster. Heartbeats carry only the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub state: ClusterState,
    pub started_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl ClusterUpdate {
    pub fn heartbeat(state: ClusterState) -> Self {
        Self {
            state,
            started_at: None,
            ready_at: None,
            ended_at: None,
            reason: None,
        }
    }

    /// Full update carrying every field of `snapshot`.
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        Self {
            state: snapshot.state,
            started_at: snapshot.started_at,
            ready_at: snapshot.ready_at,
            ended_at: snapshot.ended_at,
            reason: snapshot.state_change_reason.clone(),
        }
    }
}
