use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, warn};

use crate::store::{JobStatus, JobStore, JobUpdate};

/// Polling parameters for one progress stream.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberConfig {
    /// Delay between record reads.
    pub poll_interval: Duration,
    /// Hard wall-clock ceiling for the whole stream.
    pub max_duration: Duration,
    /// Ticks of `status=running` at zero progress before the stall guard
    /// declares the job dead.
    pub stall_ticks: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            max_duration: Duration::from_secs(600),
            stall_ticks: 100,
        }
    }
}

/// One event on a progress stream, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Progress changed. Carries the file name once the job is complete.
    Progress { percent: f64, file_name: Option<String> },
    /// Terminal failure (job error, not-found, stall, or stream timeout).
    Error(String),
}

impl StreamEvent {
    /// Wire payload: `<percent>[|<file_name>]` or `ERROR:<message>`.
    pub fn payload(&self) -> String {
        match self {
            StreamEvent::Progress { percent, file_name } => match file_name {
                Some(name) => format!("{:.1}|{}", percent, name),
                None => format!("{:.1}", percent),
            },
            StreamEvent::Error(message) => format!("ERROR:{}", message),
        }
    }
}

/// Poll one job's record and yield its state changes until a terminal
/// state or the time ceiling.
///
/// This is a per-consumer cooperative loop, not a store subscription:
/// the store needs no push support, and a consumer that goes away simply
/// drops the stream, which ends the loop at the next suspension point.
///
/// The stall guard is the one place the read path mutates the record:
/// a job stuck at zero progress while `running` would otherwise never
/// reach a terminal state for any observer, so the subscriber forces it
/// to `error` and reports the timeout.
pub fn stream_progress(
    jobs: Arc<JobStore>,
    job_id: String,
    config: SubscriberConfig,
) -> impl Stream<Item = StreamEvent> {
    async_stream::stream! {
        let max_ticks =
            (config.max_duration.as_millis() / config.poll_interval.as_millis().max(1)) as u64;
        let mut last_progress = -1.0f64;
        let mut tick = 0u64;

        loop {
            tick += 1;
            if tick > max_ticks {
                warn!(job_id = %job_id, "Progress stream hit time ceiling");
                yield StreamEvent::Error("Timeout".to_string());
                break;
            }

            let record = match jobs.get(&job_id) {
                Ok(record) => record,
                Err(error) => {
                    warn!(job_id = %job_id, %error, "Store read failed during progress stream");
                    yield StreamEvent::Error("Connection error".to_string());
                    break;
                }
            };

            let Some(record) = record else {
                yield StreamEvent::Error("Job not found".to_string());
                break;
            };

            if record.progress != last_progress {
                let file_name = (record.progress >= 100.0 && !record.file_name.is_empty())
                    .then(|| record.file_name.clone());
                yield StreamEvent::Progress {
                    percent: record.progress,
                    file_name,
                };
                last_progress = record.progress;
            }

            if !record.error.is_empty() {
                yield StreamEvent::Error(record.error.clone());
                break;
            }

            if record.status.is_terminal() {
                debug!(job_id = %job_id, status = record.status.as_str(), "Progress stream done");
                break;
            }

            // Stall guard: running, plenty of ticks gone, still no progress.
            if record.status == JobStatus::Running
                && tick > config.stall_ticks
                && record.progress == 0.0
            {
                warn!(job_id = %job_id, tick, "No progress within stall window, failing job");
                if let Err(error) =
                    jobs.update(&job_id, JobUpdate::failed("Timeout: no progress"))
                {
                    warn!(job_id = %job_id, %error, "Failed to record stall timeout");
                }
                yield StreamEvent::Error("Download timed out (no progress)".to_string());
                break;
            }

            tokio::time::sleep(config.poll_interval).await;
        }
    }
}
