//! Command-line rewriting applied before a step reaches its execution backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;

pub trait CommandRewriter: Send + Sync {
    /// Return a command line equivalent to `command_line` for this environment.
    fn rewrite(&self, command_line: &[String]) -> Vec<String>;
}

/// Leaves command lines untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl CommandRewriter for Passthrough {
    fn rewrite(&self, command_line: &[String]) -> Vec<String> {
        command_line.to_vec()
    }
}

/// Points `s3://bucket/key` arguments at `file://{local_dir}/bucket/key`.
#[derive(Debug, Clone)]
pub struct LocalPathRewriter {
    local_dir: PathBuf,
}

impl LocalPathRewriter {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }
}

impl CommandRewriter for LocalPathRewriter {
    fn rewrite(&self, command_line: &[String]) -> Vec<String> {
        let dir = self.local_dir.to_string_lossy();
        let target = format!("file://{}/", dir.trim_end_matches('/'));
        command_line
            .iter()
            .map(|arg| arg.replace("s3://", &target))
            .collect()
    }
}

pub fn from_config(config: &EngineConfig) -> Arc<dyn CommandRewriter> {
    match &config.convert_s3_to_local {
        Some(dir) => {
            tracing::info!(local_dir = %dir.display(), "Rewriting s3 paths to local files");
            Arc::new(LocalPathRewriter::new(dir.clone()))
        }
        None => Arc::new(Passthrough),
    }
}
