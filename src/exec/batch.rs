use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::batch::{translate, BatchClient, BatchRequest};
use crate::config::{BatchConfig, MockS3Config};
use crate::error::{EmrError, Result};
use crate::exec::ExecBackend;
use crate::model::{ClusterEnv, FailureDetails, StepOutcome, StepSnapshot};

static S3_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"s3n?://").expect("s3 scheme pattern is valid"));

/// Runs `spark-submit` steps on the batch service reachable at the step's host.
#[derive(Debug, Clone)]
pub struct BatchExec {
    client: BatchClient,
    mock_s3: Option<MockS3Config>,
}

impl BatchExec {
    pub fn new(config: BatchConfig, mock_s3: Option<MockS3Config>) -> Result<Self> {
        Ok(Self {
            client: BatchClient::new(config)?,
            mock_s3,
        })
    }

    /// Base URL of the batch service for `host`. Hosts given as URLs are used as is.
    pub fn base_url(&self, host: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", host, self.client.config().port)
        }
    }

    /// Translate a command line into the request sent to the batch service.
    pub fn prepare(&self, command_line: &[String]) -> Result<BatchRequest> {
        match &self.mock_s3 {
            None => translate(command_line),
            Some(mock) => {
                let mut request = translate(&to_s3a(command_line))?;
                request.conf.extend(mock_s3_conf(mock));
                Ok(request)
            }
        }
    }
}

#[async_trait]
impl ExecBackend for BatchExec {
    fn validate(&self, command_line: &[String]) -> Result<()> {
        self.prepare(command_line).map(|_| ())
    }

    async fn run(&self, step: &StepSnapshot, _env: &ClusterEnv) -> Result<StepOutcome> {
        let request = match self.prepare(&step.args) {
            Ok(request) => request,
            Err(EmrError::Validation(message)) => {
                tracing::warn!(step_id = %step.id, error = %message, "Step rejected by translator");
                return Ok(StepOutcome::failed(
                    FailureDetails::new("Invalid step").with_message(message),
                ));
            }
            Err(e) => return Err(e),
        };

        let base_url = self.base_url(&step.host);
        tracing::info!(
            step_id = %step.id,
            host = %base_url,
            file = %request.file,
            "Sending step to batch service"
        );
        self.client.run_to_completion(&base_url, &request).await
    }
}

/// Rewrite `s3://` and `s3n://` locations to `s3a://`.
pub fn to_s3a(command_line: &[String]) -> Vec<String> {
    command_line
        .iter()
        .map(|arg| S3_SCHEME.replace_all(arg, "s3a://").into_owned())
        .collect()
}

/// S3 client factory that disables chunked uploads, which mock S3 endpoints reject.
/// The class has to be on the batch service's classpath.
pub const NON_CHUNKED_CLIENT_FACTORY: &str =
    "dev.sumitsu.s3mocktest.NonChunkedDefaultS3ClientFactory";

fn mock_s3_conf(mock: &MockS3Config) -> Vec<(String, String)> {
    [
        ("spark.hadoop.fs.s3a.impl", "org.apache.hadoop.fs.s3a.S3AFileSystem"),
        (
            "spark.hadoop.fs.s3a.s3.client.factory.impl",
            NON_CHUNKED_CLIENT_FACTORY,
        ),
        ("spark.hadoop.fs.s3a.endpoint", mock.endpoint.as_str()),
        ("spark.hadoop.fs.s3a.access.key", mock.access_key_id.as_str()),
        ("spark.hadoop.fs.s3a.secret.key", mock.secret_access_key.as_str()),
        ("spark.hadoop.fs.s3a.path.style.access", "true"),
        ("spark.hadoop.fs.s3a.multiobjectdelete.enable", "false"),
        ("spark.hadoop.fs.s3a.change.detection.version.required", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
