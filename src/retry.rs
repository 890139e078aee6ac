//! Retry tracking for failed downloads
//!
//! A retry is a brand-new job record chained to the failed one through
//! `parent_job_id`/`child_job_id`; the failed record keeps its status and
//! error so the failure history survives. Lineage is a simple path: each
//! record has at most one parent and at most one child, and a job that
//! already has a child cannot be retried again.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::store::{JobRecord, JobStatus, JobStore, JobUpdate, MediaType, NewJob, StoreError};

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} cannot be retried (state or retry budget disallows it)")]
    Exhausted(String),

    #[error("Job {0} already has a retry")]
    AlreadyRetried(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RetryError>;

/// Per-field overrides for the parameters a retry copies from the original.
#[derive(Debug, Clone, Default)]
pub struct RetryOverrides {
    pub url: Option<String>,
    pub platform: Option<String>,
    pub media_type: Option<MediaType>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

/// Retry state for one job, as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    pub job_id: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retries_remaining: u32,
    pub can_retry: bool,
    pub parent_job_id: String,
    pub child_job_id: String,
}

/// Creates retry jobs and walks retry lineage.
pub struct RetryTracker {
    jobs: Arc<JobStore>,
    max_retries: u32,
}

impl RetryTracker {
    pub fn new(jobs: Arc<JobStore>, max_retries: u32) -> Self {
        Self { jobs, max_retries }
    }

    /// True iff the record exists, failed (or was cancelled), has retry
    /// budget left, and has not already been retried.
    pub fn can_retry(&self, job_id: &str) -> std::result::Result<bool, StoreError> {
        let Some(record) = self.jobs.get(job_id)? else {
            return Ok(false);
        };
        Ok(Self::retryable(&record, self.max_retries))
    }

    fn retryable(record: &JobRecord, max_retries: u32) -> bool {
        matches!(record.status, JobStatus::Error | JobStatus::Cancelled)
            && record.retry_count < max_retries
            && record.child_job_id.is_empty()
    }

    /// Create a follow-up job for a failed one.
    ///
    /// The new record copies the original's request parameters (each
    /// overridable), bumps the retry count, links back through
    /// `parent_job_id`, and starts queued with cleared progress/file/error
    /// fields. The original record's own status and error are left
    /// untouched; only its `child_job_id` is set.
    pub fn create_retry(&self, job_id: &str, overrides: RetryOverrides) -> Result<JobRecord> {
        let original = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| RetryError::NotFound(job_id.to_string()))?;

        if !original.child_job_id.is_empty() {
            return Err(RetryError::AlreadyRetried(job_id.to_string()));
        }
        if !Self::retryable(&original, self.max_retries) {
            return Err(RetryError::Exhausted(job_id.to_string()));
        }

        let new_job = NewJob {
            url: overrides.url.unwrap_or(original.url),
            platform: overrides.platform.unwrap_or(original.platform),
            media_type: overrides.media_type.unwrap_or(original.media_type),
            format: overrides.format.unwrap_or(original.format),
            quality: overrides.quality.unwrap_or(original.quality),
            retry_count: original.retry_count + 1,
            parent_job_id: job_id.to_string(),
        };

        let record = self.jobs.create(new_job)?;

        self.jobs.update(
            job_id,
            JobUpdate {
                child_job_id: Some(record.job_id.clone()),
                ..Default::default()
            },
        )?;

        info!(
            job_id = %record.job_id,
            parent_job_id = %job_id,
            retry_count = record.retry_count,
            "Retry job created"
        );
        Ok(record)
    }

    /// Full lineage of the chain containing `job_id`, oldest first.
    ///
    /// Walks `parent_job_id` back to the root, then `child_job_id` forward
    /// to the newest descendant. Ids are never revisited, so a malformed
    /// cyclic link terminates the walk instead of looping a reader forever.
    pub fn chain(&self, job_id: &str) -> std::result::Result<Vec<String>, StoreError> {
        let mut chain = vec![job_id.to_string()];
        let mut seen: std::collections::HashSet<String> =
            std::iter::once(job_id.to_string()).collect();

        let mut current = self.jobs.get(job_id)?;
        while let Some(record) = current {
            if record.parent_job_id.is_empty() || !seen.insert(record.parent_job_id.clone()) {
                break;
            }
            chain.insert(0, record.parent_job_id.clone());
            current = self.jobs.get(&record.parent_job_id)?;
        }

        let mut latest = self.jobs.get(job_id)?;
        while let Some(record) = latest {
            if record.child_job_id.is_empty() || !seen.insert(record.child_job_id.clone()) {
                break;
            }
            chain.push(record.child_job_id.clone());
            latest = self.jobs.get(&record.child_job_id)?;
        }

        Ok(chain)
    }

    /// Retry budget and lineage links for one job.
    pub fn info(&self, job_id: &str) -> Result<RetryInfo> {
        let record = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| RetryError::NotFound(job_id.to_string()))?;

        Ok(RetryInfo {
            job_id: job_id.to_string(),
            retry_count: record.retry_count,
            max_retries: self.max_retries,
            retries_remaining: self.max_retries.saturating_sub(record.retry_count),
            can_retry: Self::retryable(&record, self.max_retries),
            parent_job_id: record.parent_job_id,
            child_job_id: record.child_job_id,
        })
    }
}
