//! API models for the download, history, retry, and admission endpoints.
//!
//! The external contract:
//! - `POST /downloads` accepts a [`StartDownloadRequest`] and answers 202
//!   with a [`JobAcceptedResponse`]; the download itself runs in the
//!   background.
//! - Job state is read back as a [`JobView`]; when a job failed, the view
//!   carries a computed `severity` class for triage alongside the stored
//!   error message.
//! - `GET /progress/{job_id}` streams `data:<percent>[|<file_name>]` /
//!   `data:ERROR:<message>` events until the job is terminal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Severity, error_severity};
use crate::store::{JobRecord, JobStatus, MediaType};

#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub url: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

impl StartDownloadRequest {
    /// Container format, defaulted per media kind.
    pub fn format_or_default(&self) -> String {
        self.format.clone().unwrap_or_else(|| {
            match self.media_type {
                MediaType::Video => "mp4",
                MediaType::Audio => "webm",
            }
            .to_string()
        })
    }

    /// Quality selector, defaulted per media kind (720p video, 192k audio).
    pub fn quality_or_default(&self) -> String {
        self.quality.clone().unwrap_or_else(|| {
            match self.media_type {
                MediaType::Video => "720",
                MediaType::Audio => "192",
            }
            .to_string()
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: String,
}

/// Client-facing projection of a job record.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobView {
    pub job_id: String,
    pub url: String,
    pub platform: String,
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
    pub status: JobStatus,
    pub progress: f64,
    pub file_name: String,
    pub file_path: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub retry_count: u32,
    pub parent_job_id: String,
    pub child_job_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        let severity = (!record.error.is_empty()).then(|| error_severity(&record.error));
        Self {
            job_id: record.job_id,
            url: record.url,
            platform: record.platform,
            media_type: record.media_type,
            format: record.format,
            quality: record.quality,
            status: record.status,
            progress: record.progress,
            file_name: record.file_name,
            file_path: record.file_path,
            error: record.error,
            severity,
            retry_count: record.retry_count,
            parent_job_id: record.parent_job_id,
            child_job_id: record.child_job_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub status: Option<JobStatus>,
    pub platform: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<JobView>,
    pub total: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteJobResponse {
    pub status: String,
    pub job_id: String,
    pub file_removed: bool,
    /// Present when the file was intentionally left alone (security
    /// rejection, not a regular file) or its removal failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
