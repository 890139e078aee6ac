//! Executor seam for media fetching
//!
//! The orchestration core invokes a [`MediaFetcher`] and consumes nothing
//! from it but the progress/error callbacks and its final result. How a
//! fetch actually happens (plain HTTP, an external downloader, a test
//! stub) is the implementor's business.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::progress::ProgressSink;
use crate::store::MediaType;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Connection timeout")]
    Timeout,

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Artifact exceeds size limit ({0} bytes)")]
    TooLarge(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Everything an executor needs to run one fetch.
///
/// `output_path` is the contract's load-bearing field: the executor MUST
/// write its artifact exactly there. The path is derived from the job id,
/// which is what lets completion find the artifact without guessing among
/// concurrent jobs' files.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: String,
    pub url: String,
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
    pub output_path: PathBuf,
}

/// A media fetch executor.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the requested media to `request.output_path`, reporting
    /// progress through the sink. Errors are returned, not reported
    /// through `on_error`; the orchestrator owns the record.
    async fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> Result<()>;
}
