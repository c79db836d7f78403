use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmrError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("Batch protocol error: {0}")]
    BatchProtocol(String),

    #[error("Host {host} unreachable after {attempts} attempts")]
    HostUnreachable { host: String, attempts: u32 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmrError {
    /// Renders the error and every `source()` below it, one per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, EmrError>;
