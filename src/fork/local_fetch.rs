use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex::Regex;
use tar::Archive;
use tokio::sync::Mutex;

use crate::config::FetchConfig;
use crate::error::{EmrError, Result};
use crate::fork::ForkBackend;
use crate::model::{ClusterEnv, ClusterSnapshot};
use crate::version;

static RUNTIME_BIN_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"spark-\d+\.\d+\.\d+-bin-without-hadoop(/bin)?/?$")
        .expect("runtime path pattern is valid")
});

/// Installs the cluster's runtime distribution under the install root.
///
/// The process environment is left alone. `create` returns the `SPARK_HOME`
/// and `PATH` the cluster's steps run with, so clusters on different releases
/// coexist in one process.
pub struct LocalFetchFork {
    config: FetchConfig,
    http: reqwest::Client,
    install_lock: Mutex<()>,
}

impl LocalFetchFork {
    pub fn new(config: FetchConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: reqwest::Client::builder().build()?,
            install_lock: Mutex::new(()),
        })
    }

    /// Directory name of the distribution for runtime version `spark`.
    pub fn dist_name(spark: &str) -> String {
        format!("spark-{}-bin-without-hadoop", spark)
    }

    pub fn archive_url(&self, spark: &str) -> String {
        format!(
            "{}/spark-{}/{}.tgz",
            self.config.mirror_url.trim_end_matches('/'),
            spark,
            Self::dist_name(spark)
        )
    }

    /// Download and unpack the distribution unless it is already installed.
    async fn ensure_installed(&self, spark: &str) -> Result<PathBuf> {
        let home = self.config.install_root.join(Self::dist_name(spark));
        let _guard = self.install_lock.lock().await;
        if tokio::fs::metadata(&home).await.is_ok_and(|m| m.is_dir()) {
            tracing::debug!(home = %home.display(), "Runtime already installed");
            return Ok(home);
        }

        let url = self.archive_url(spark);
        tracing::info!(url = %url, root = %self.config.install_root.display(), "Downloading runtime");
        let archive = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        tokio::fs::create_dir_all(&self.config.install_root).await?;
        let root = self.config.install_root.clone();
        tokio::task::spawn_blocking(move || unpack(&archive, &root))
            .await
            .map_err(|e| EmrError::Internal(format!("unpack task panicked: {}", e)))??;

        if !home.is_dir() {
            return Err(EmrError::Internal(format!(
                "{} did not contain {}",
                url,
                Self::dist_name(spark)
            )));
        }
        tracing::info!(home = %home.display(), "Runtime installed");
        Ok(home)
    }
}

fn unpack(archive: &[u8], root: &Path) -> Result<()> {
    Archive::new(GzDecoder::new(archive)).unpack(root)?;
    Ok(())
}

/// Put `bin` first on a `:`-separated search path and drop every other
/// versioned runtime segment.
pub fn replace_runtime_in_path(bin: &str, path: &str) -> String {
    std::iter::once(bin)
        .chain(
            path.split(':')
                .filter(|segment| !segment.is_empty() && !RUNTIME_BIN_SEGMENT.is_match(segment)),
        )
        .collect::<Vec<_>>()
        .join(":")
}

/// Step environment selecting the runtime installed at `home`.
pub fn runtime_env(home: &Path, base_path: &str) -> ClusterEnv {
    let bin = home.join("bin");
    ClusterEnv::from([
        (
            "SPARK_HOME".to_string(),
            home.to_string_lossy().into_owned(),
        ),
        (
            "PATH".to_string(),
            replace_runtime_in_path(&bin.to_string_lossy(), base_path),
        ),
    ])
}

#[async_trait]
impl ForkBackend for LocalFetchFork {
    async fn create(&self, cluster: &ClusterSnapshot) -> Result<ClusterEnv> {
        let spark = version::spark_version(&cluster.release_label)?;
        let home = self.ensure_installed(spark).await?;
        let base_path = std::env::var("PATH").unwrap_or_default();

        tracing::info!(cluster_id = %cluster.id, spark_home = %home.display(), "Runtime selected");
        Ok(runtime_env(&home, &base_path))
    }

    async fn terminate(&self, cluster: &ClusterSnapshot) -> Result<()> {
        tracing::debug!(cluster_id = %cluster.id, "Nothing to release for local runtime");
        Ok(())
    }
}
