//! Batch job service protocol.
//!
//! - [`translate`]: `spark-submit` command line to [`BatchRequest`]
//! - [`BatchClient`]: submission, polling and log retrieval over HTTP

pub mod client;
pub mod models;
pub mod translate;

pub use client::BatchClient;
pub use models::{BatchLog, BatchObject, BatchRequest, BatchState};
pub use translate::{clean_for_local_run, translate};
