use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Body of `POST /batches`.
///
/// Resource sizing is never forwarded: the job runs with whatever the
/// batch service has available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub file: String,
    pub class_name: Option<String>,
    pub proxy_user: Option<String>,
    pub args: Vec<String>,
    pub conf: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    NotStarted,
    Starting,
    Running,
    Busy,
    Idle,
    ShuttingDown,
    Success,
    Error,
    Dead,
    /// Anything the service reports that is not a known batch state
    #[serde(other)]
    Unknown,
}

impl BatchState {
    /// States the poller keeps waiting on.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchState::NotStarted
                | BatchState::Starting
                | BatchState::Running
                | BatchState::Busy
                | BatchState::Idle
                | BatchState::ShuttingDown
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Success | BatchState::Error | BatchState::Dead
        )
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchState::NotStarted => write!(f, "not_started"),
            BatchState::Starting => write!(f, "starting"),
            BatchState::Running => write!(f, "running"),
            BatchState::Busy => write!(f, "busy"),
            BatchState::Idle => write!(f, "idle"),
            BatchState::ShuttingDown => write!(f, "shutting_down"),
            BatchState::Success => write!(f, "success"),
            BatchState::Error => write!(f, "error"),
            BatchState::Dead => write!(f, "dead"),
            BatchState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Response of `POST /batches` and `GET /batches/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchObject {
    pub id: i64,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_info: HashMap<String, Option<String>>,
    #[serde(default)]
    pub log: Vec<String>,
    pub state: BatchState,
}

/// Response of `GET /batches/{id}/log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLog {
    #[serde(default)]
    pub log: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_keys() {
        let request = BatchRequest {
            file: "/tmp/app.jar".to_string(),
            class_name: Some("com.example.Main".to_string()),
            proxy_user: None,
            args: vec!["in".to_string()],
            conf: BTreeMap::from([("spark.app.name".to_string(), "test".to_string())]),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "file": "/tmp/app.jar",
                "className": "com.example.Main",
                "proxyUser": null,
                "args": ["in"],
                "conf": {"spark.app.name": "test"},
            })
        );
    }

    #[test]
    fn batch_object_from_service_json() {
        let batch: BatchObject = serde_json::from_value(json!({
            "id": 3,
            "appId": null,
            "appInfo": {"driverLogUrl": null, "sparkUiUrl": null},
            "log": ["stdout: ", "\nstderr: "],
            "state": "shutting_down",
        }))
        .unwrap();
        assert_eq!(batch.id, 3);
        assert_eq!(batch.state, BatchState::ShuttingDown);
        assert!(batch.state.is_running());
        assert_eq!(batch.log.len(), 2);
    }

    #[test]
    fn unrecognised_state_is_neither_running_nor_terminal() {
        let batch: BatchObject =
            serde_json::from_value(json!({"id": 1, "state": "recovering"})).unwrap();
        assert_eq!(batch.state, BatchState::Unknown);
        assert!(!batch.state.is_running());
        assert!(!batch.state.is_terminal());
    }
}
