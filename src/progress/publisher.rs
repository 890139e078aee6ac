use std::sync::Arc;

use tracing::warn;

use crate::errors::{error_severity, normalize_error};
use crate::store::{JobStatus, JobStore, JobUpdate};

/// Callback surface handed to a fetch executor.
///
/// The executor stays ignorant of how progress is persisted; it only
/// reports percentages and failures through these two methods.
pub trait ProgressSink: Send + Sync {
    /// Report fetch progress as a percentage (0-100).
    fn on_progress(&self, percent: f64);

    /// Report a fatal fetch error.
    fn on_error(&self, message: &str);
}

/// Sink that writes progress onto the job record.
///
/// Store-write failures are swallowed and logged: the record is
/// best-effort telemetry, and a failed write must never abort a download
/// in flight. The executor's own success/failure stays authoritative.
pub struct RecordSink {
    jobs: Arc<JobStore>,
    job_id: String,
}

impl RecordSink {
    pub fn new(jobs: Arc<JobStore>, job_id: String) -> Self {
        Self { jobs, job_id }
    }
}

impl ProgressSink for RecordSink {
    fn on_progress(&self, percent: f64) {
        // One decimal of resolution, clamped to the valid range.
        let percent = (percent.clamp(0.0, 100.0) * 10.0).round() / 10.0;

        let update = JobUpdate {
            status: Some(JobStatus::Running),
            progress: Some(percent),
            ..Default::default()
        };
        if let Err(error) = self.jobs.update(&self.job_id, update) {
            warn!(job_id = %self.job_id, %error, "Failed to record progress");
        }
    }

    fn on_error(&self, message: &str) {
        let message = normalize_error(message);
        let severity = error_severity(&message);
        warn!(job_id = %self.job_id, ?severity, error = %message, "Fetch failed");

        if let Err(error) = self.jobs.update(&self.job_id, JobUpdate::failed(&message)) {
            warn!(job_id = %self.job_id, %error, "Failed to record fetch error");
        }
    }
}
