//! A local stand-in for a managed big-data cluster service.
//!
//! Clusters are provisioned by a [`fork::ForkBackend`], their steps run one at
//! a time through an [`exec::ExecBackend`], and every cluster is driven by its
//! own worker task. [`engine::Engine`] is the entry point.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fork;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod staging;
pub mod version;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EmrError, Result};
