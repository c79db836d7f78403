use std::time::Duration;

use tokio::time::Instant;

use crate::batch::models::{BatchLog, BatchObject, BatchRequest, BatchState};
use crate::config::BatchConfig;
use crate::error::{EmrError, Result};
use crate::model::{FailureDetails, StepOutcome};

/// HTTP client for a batch job service.
#[derive(Debug, Clone)]
pub struct BatchClient {
    http: reqwest::Client,
    config: BatchConfig,
}

impl BatchClient {
    pub fn new(config: BatchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Wait until `base_url` accepts connections.
    ///
    /// Only connection failures are retried, with exponential backoff. Any HTTP
    /// answer, whatever its status, means the host is up.
    pub async fn wait_for_host(&self, base_url: &str) -> Result<()> {
        let attempts = self.config.connect_retries.max(1);
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.backoff(attempt)).await;
            match self.http.get(base_url).send().await {
                Ok(_) => {
                    tracing::debug!(host = base_url, attempt, "Batch service reachable");
                    return Ok(());
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    tracing::warn!(
                        host = base_url,
                        attempt,
                        attempts,
                        error = %e,
                        "Batch service not reachable yet"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EmrError::HostUnreachable {
            host: base_url.to_string(),
            attempts,
        })
    }

    pub async fn submit(&self, base_url: &str, request: &BatchRequest) -> Result<BatchObject> {
        let batch: BatchObject = self
            .http
            .post(format!("{}/batches", base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::info!(host = base_url, batch_id = batch.id, state = %batch.state, "Batch submitted");
        Ok(batch)
    }

    pub async fn get(&self, base_url: &str, batch_id: i64) -> Result<BatchObject> {
        let batch: BatchObject = self
            .http
            .get(format!("{}/batches/{}", base_url, batch_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(host = base_url, batch_id, state = %batch.state, "Batch polled");
        Ok(batch)
    }

    pub async fn logs(&self, base_url: &str, batch_id: i64) -> Result<Vec<String>> {
        let log: BatchLog = self
            .http
            .get(format!("{}/batches/{}/log", base_url, batch_id))
            .query(&[("from", 0u32), ("size", self.config.log_lines)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(log.log)
    }

    /// Submit `request` and poll it until it reaches a terminal state.
    pub async fn run_to_completion(
        &self,
        base_url: &str,
        request: &BatchRequest,
    ) -> Result<StepOutcome> {
        self.wait_for_host(base_url).await?;

        let mut batch = self.submit(base_url, request).await?;
        let started = Instant::now();
        while batch.state.is_running() {
            if let Some(max_wait) = self.config.max_wait() {
                if started.elapsed() >= max_wait {
                    tracing::warn!(batch_id = batch.id, state = %batch.state, "Gave up polling batch");
                    return Ok(StepOutcome::failed(
                        FailureDetails::new("Timed out").with_message(format!(
                            "Batch {} still {} after {:?}",
                            batch.id, batch.state, max_wait
                        )),
                    ));
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
            batch = self.get(base_url, batch.id).await?;
        }

        match batch.state {
            BatchState::Success => Ok(StepOutcome::completed()),
            BatchState::Error | BatchState::Dead => {
                let log = self.logs(base_url, batch.id).await?.join("\n");
                tracing::info!(batch_id = batch.id, state = %batch.state, "Batch failed");
                Ok(StepOutcome::failed(FailureDetails::from_log(
                    "Unknown Error",
                    &log,
                )))
            }
            other => Err(EmrError::BatchProtocol(format!(
                "Quit polling batch {} in non-terminal state {}",
                batch.id, other
            ))),
        }
    }
}
