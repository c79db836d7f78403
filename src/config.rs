use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Which execution backend runs steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecBackendKind {
    /// Translate `spark-submit` steps into batch requests for an HTTP batch service.
    Batch,
    /// Run the step's command line as a local child process.
    Subprocess,
}

/// Which provisioning backend brings clusters up and down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkBackendKind {
    /// One container per cluster, attached to the anchor container's network.
    Container,
    /// Download a versioned runtime distribution and put it on the search path.
    LocalFetch,
}

/// Settings for talking to the HTTP batch service.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Port the batch service listens on inside each cluster
    pub port: u16,
    /// Delay between two status polls
    pub poll_interval_ms: u64,
    /// Upper bound on the whole polling loop. `None` polls until a terminal state.
    pub max_wait_ms: Option<u64>,
    /// Connection attempts made while waiting for the service to come up
    pub connect_retries: u32,
    /// Base of the exponential backoff between connection attempts
    pub backoff_factor_ms: u64,
    /// Number of log lines fetched when a batch fails
    pub log_lines: u32,
    /// Timeout applied to every single HTTP request
    pub request_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            port: 8998,
            poll_interval_ms: 5000,
            max_wait_ms: None,
            connect_retries: 8,
            backoff_factor_ms: 500,
            log_lines: 100,
            request_timeout_ms: 30_000,
        }
    }
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    /// Sleep before connection attempt `attempt` (1-based). The first attempt never waits.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        Duration::from_millis(self.backoff_factor_ms.saturating_mul(1u64 << exp))
    }
}

/// Settings for the container provisioning driver.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Name of the already-running container whose network new clusters join
    pub anchor_container: String,
    /// Image repository; the runtime version is appended as the tag
    pub image_repo: String,
    /// Port published by every cluster container
    pub service_port: u16,
    /// Environment passed to every cluster container
    pub env: BTreeMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            anchor_container: "localemr".to_string(),
            image_repo: "davlum/localemr-container:".to_string(),
            service_port: 8998,
            env: BTreeMap::new(),
        }
    }
}

/// Settings for the local-fetch provisioning driver.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub install_root: PathBuf,
    pub mirror_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("/opt"),
            mirror_url: "https://archive.apache.org/dist/spark".to_string(),
        }
    }
}

/// Credentials and endpoint of an S3-compatible mock used by batch jobs.
#[derive(Debug, Clone)]
pub struct MockS3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the per-step stdout/stderr log tree
    pub log_root: PathBuf,
    /// How long an idle cluster worker sleeps between queue checks
    pub idle_interval_ms: u64,
    /// Host every step contacts. Defaults to the cluster name when unset.
    pub emr_host: Option<String>,
    pub exec: ExecBackendKind,
    pub fork: ForkBackendKind,
    pub batch: BatchConfig,
    pub container: ContainerConfig,
    pub fetch: FetchConfig,
    pub mock_s3: Option<MockS3Config>,
    /// Rewrite `s3://` paths in step arguments into this local directory
    pub convert_s3_to_local: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("/var/log"),
            idle_interval_ms: 4000,
            emr_host: None,
            exec: ExecBackendKind::Batch,
            fork: ForkBackendKind::Container,
            batch: BatchConfig::default(),
            container: ContainerConfig::default(),
            fetch: FetchConfig::default(),
            mock_s3: None,
            convert_s3_to_local: None,
        }
    }
}

impl EngineConfig {
    pub fn new(exec: ExecBackendKind, fork: ForkBackendKind) -> Self {
        Self {
            exec,
            fork,
            ..Default::default()
        }
    }

    pub fn with_log_root(mut self, log_root: impl Into<PathBuf>) -> Self {
        self.log_root = log_root.into();
        self
    }

    pub fn with_idle_interval_ms(mut self, idle_interval_ms: u64) -> Self {
        self.idle_interval_ms = idle_interval_ms;
        self
    }

    pub fn with_emr_host(mut self, host: impl Into<String>) -> Self {
        self.emr_host = Some(host.into());
        self
    }

    pub fn with_mock_s3(mut self, mock_s3: MockS3Config) -> Self {
        self.mock_s3 = Some(mock_s3);
        self
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}
