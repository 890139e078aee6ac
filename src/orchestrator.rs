//! Per-request download orchestration
//!
//! Glues the record store, admission control, progress publishing, and the
//! fetch executor together. Every accepted request becomes one background
//! task: wait for a slot, run the fetch with callbacks bound to the job
//! record, finalize the record from the produced artifact, release the
//! slot no matter how the fetch ended.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::admission::{AcquireOutcome, AdmissionController};
use crate::artifacts;
use crate::fetcher::{FetchRequest, MediaFetcher};
use crate::observability::Metrics;
use crate::progress::{ProgressSink, RecordSink};
use crate::store::{JobRecord, JobStatus, JobStore, JobUpdate, NewJob, StoreError};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The admission queue gate rejected the request before a record was
    /// committed; callers should retry later.
    #[error("download queue is at capacity")]
    AtCapacity,

    /// The state store could not be reached; nothing was created.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ties record store, admission, executor, and metrics together per job.
pub struct DownloadOrchestrator {
    jobs: Arc<JobStore>,
    admission: Arc<AdmissionController>,
    fetcher: Arc<dyn MediaFetcher>,
    metrics: Arc<Metrics>,
    output_dir: PathBuf,
    acquire_timeout: Duration,
}

/// Releases the admission slot when the job body is done with it, on every
/// exit path including panics unwinding through the task.
struct SlotGuard {
    admission: Arc<AdmissionController>,
    job_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Err(error) = self.admission.release(&self.job_id) {
            warn!(job_id = %self.job_id, %error, "Failed to release admission slot");
        }
    }
}

impl DownloadOrchestrator {
    pub fn new(
        jobs: Arc<JobStore>,
        admission: Arc<AdmissionController>,
        fetcher: Arc<dyn MediaFetcher>,
        metrics: Arc<Metrics>,
        output_dir: PathBuf,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            admission,
            fetcher,
            metrics,
            output_dir,
            acquire_timeout,
        }
    }

    /// Admit a new download: check the queue gate, commit the record, and
    /// launch the background task. Store failures here are fatal to the
    /// request; without the record there is nothing to track.
    pub fn submit(self: &Arc<Self>, new: NewJob) -> Result<JobRecord, SubmitError> {
        if !self.admission.has_capacity()? {
            warn!(url = %new.url, "Rejecting download, queue at capacity");
            return Err(SubmitError::AtCapacity);
        }

        let record = self.jobs.create(new)?;
        self.metrics.job_created();
        info!(job_id = %record.job_id, platform = %record.platform, "Download accepted");

        self.launch(&record);
        Ok(record)
    }

    /// Spawn the background task for an already-committed record (new
    /// submissions and retries both come through here).
    pub fn launch(self: &Arc<Self>, record: &JobRecord) {
        let orchestrator = Arc::clone(self);
        let record = record.clone();
        tokio::spawn(async move {
            orchestrator.run_job(record).await;
        });
    }

    async fn run_job(self: Arc<Self>, record: JobRecord) {
        let job_id = record.job_id.clone();

        match self.admission.acquire(&job_id, self.acquire_timeout).await {
            Ok(AcquireOutcome::Granted) => {}
            Ok(AcquireOutcome::TimedOut) => {
                self.metrics.admission_timeout();
                warn!(job_id = %job_id, "No download slot within deadline");
                let update =
                    JobUpdate::failed("Timed out waiting for a download slot. Try again later.");
                if let Err(error) = self.jobs.update(&job_id, update) {
                    warn!(job_id = %job_id, %error, "Failed to record admission timeout");
                }
                return;
            }
            Err(error) => {
                // Store unreachable: no slot was taken, nothing to roll back.
                error!(job_id = %job_id, %error, "Admission unavailable");
                return;
            }
        }

        let _slot = SlotGuard {
            admission: Arc::clone(&self.admission),
            job_id: job_id.clone(),
        };

        let running = JobUpdate {
            status: Some(JobStatus::Running),
            progress: Some(0.0),
            ..Default::default()
        };
        if let Err(error) = self.jobs.update(&job_id, running) {
            // Record expired or was deleted while queued; nothing to run for.
            warn!(job_id = %job_id, %error, "Job record gone before fetch start");
            return;
        }

        let request = FetchRequest {
            job_id: job_id.clone(),
            url: record.url.clone(),
            media_type: record.media_type,
            format: record.format.clone(),
            quality: record.quality.clone(),
            output_path: artifacts::output_path(
                &self.output_dir,
                record.media_type,
                &job_id,
                &record.format,
            ),
        };
        let sink = RecordSink::new(Arc::clone(&self.jobs), job_id.clone());

        info!(job_id = %job_id, url = %record.url, media_type = record.media_type.as_str(), "Starting fetch");

        match self.fetcher.fetch(&request, &sink).await {
            Ok(()) => match artifacts::locate(&self.output_dir, &job_id, &request.output_path) {
                Some(path) => {
                    let file_name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let done = JobUpdate {
                        status: Some(JobStatus::Done),
                        progress: Some(100.0),
                        file_name: Some(file_name.clone()),
                        file_path: Some(path.to_string_lossy().into_owned()),
                        ..Default::default()
                    };
                    match self.jobs.update(&job_id, done) {
                        Ok(()) => {
                            self.metrics.job_completed();
                            info!(job_id = %job_id, file = %file_name, "Download complete");
                        }
                        Err(error) => {
                            warn!(job_id = %job_id, %error, "Failed to finalize job record");
                        }
                    }
                }
                None => {
                    self.metrics.job_failed();
                    sink.on_error("Download completed but the output file was not found");
                }
            },
            Err(error) => {
                self.metrics.job_failed();
                sink.on_error(&error.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;
    use crate::store::{KvStore, MediaType};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Scripted executor for orchestration tests.
    enum StubBehavior {
        /// Write the artifact at the requested path, reporting progress.
        Succeed,
        /// Return a fetch error without writing anything.
        Fail(&'static str),
        /// Return Ok but write nothing.
        Vanish,
        /// Block until the test is over.
        Hang,
    }

    struct StubFetcher(StubBehavior);

    #[async_trait]
    impl MediaFetcher for StubFetcher {
        async fn fetch(
            &self,
            request: &FetchRequest,
            sink: &dyn crate::progress::ProgressSink,
        ) -> crate::fetcher::Result<()> {
            match self.0 {
                StubBehavior::Succeed => {
                    sink.on_progress(50.0);
                    tokio::fs::write(&request.output_path, b"media bytes").await?;
                    sink.on_progress(100.0);
                    Ok(())
                }
                StubBehavior::Fail(message) => {
                    Err(FetchError::RequestFailed(message.to_string()))
                }
                StubBehavior::Vanish => Ok(()),
                StubBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    struct Harness {
        orchestrator: Arc<DownloadOrchestrator>,
        jobs: Arc<JobStore>,
        admission: Arc<AdmissionController>,
        _store_dir: TempDir,
        _output_dir: TempDir,
    }

    fn harness(behavior: StubBehavior, max_concurrent: u32, max_queue: u32) -> Harness {
        let store_dir = TempDir::new().unwrap();
        let output_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(store_dir.path().join("store")).unwrap());
        let jobs = Arc::new(JobStore::new(kv.clone(), Duration::from_secs(86400)));
        let admission = Arc::new(AdmissionController::new(
            kv,
            max_concurrent,
            max_queue,
            Duration::from_millis(5),
        ));
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            jobs.clone(),
            admission.clone(),
            Arc::new(StubFetcher(behavior)),
            Arc::new(Metrics::new()),
            output_dir.path().to_path_buf(),
            Duration::from_millis(50),
        ));
        Harness {
            orchestrator,
            jobs,
            admission,
            _store_dir: store_dir,
            _output_dir: output_dir,
        }
    }

    fn video_job() -> NewJob {
        NewJob::new(
            "https://youtube.com/watch?v=abc".to_string(),
            "youtube".to_string(),
            MediaType::Video,
            "mp4".to_string(),
            "720".to_string(),
        )
    }

    async fn wait_for_terminal(jobs: &JobStore, job_id: &str) -> JobRecord {
        for _ in 0..200 {
            if let Some(record) = jobs.get(job_id).unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn test_successful_fetch_finalizes_record_and_releases_slot() {
        let h = harness(StubBehavior::Succeed, 2, 50);

        let record = h.orchestrator.submit(video_job()).unwrap();
        let done = wait_for_terminal(&h.jobs, &record.job_id).await;

        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.progress, 100.0);
        assert_eq!(
            done.file_name,
            format!("video_{}.mp4", record.job_id)
        );
        assert!(std::path::Path::new(&done.file_path).is_file());

        // Slot came back.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.admission.status().unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_records_error_and_releases_slot() {
        let h = harness(StubBehavior::Fail("connection refused by host"), 2, 50);

        let record = h.orchestrator.submit(video_job()).unwrap();
        let failed = wait_for_terminal(&h.jobs, &record.job_id).await;

        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(
            failed.error,
            "Could not connect to the server. Check your internet connection."
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.admission.status().unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_an_execution_failure() {
        let h = harness(StubBehavior::Vanish, 2, 50);

        let record = h.orchestrator.submit(video_job()).unwrap();
        let failed = wait_for_terminal(&h.jobs, &record.job_id).await;

        assert_eq!(failed.status, JobStatus::Error);
        assert!(failed.error.to_lowercase().contains("output file"));
    }

    #[tokio::test]
    async fn test_admission_timeout_resolves_to_terminal_error() {
        let h = harness(StubBehavior::Hang, 1, 50);

        // First job takes the only slot and never finishes.
        let first = h.orchestrator.submit(video_job()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = h.orchestrator.submit(video_job()).unwrap();
        let failed = wait_for_terminal(&h.jobs, &second.job_id).await;

        assert_eq!(failed.status, JobStatus::Error);
        assert!(failed.error.contains("download slot"));

        // The hung job still holds its slot; the failed acquire rolled
        // its increment back.
        let status = h.admission.status().unwrap();
        assert_eq!(status.active, 1);
        assert!(status.active_jobs.contains(&first.job_id));
    }

    #[tokio::test]
    async fn test_queue_gate_rejects_before_creating_a_record() {
        let h = harness(StubBehavior::Hang, 1, 1);

        h.orchestrator.submit(video_job()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = h.orchestrator.submit(video_job());
        assert!(matches!(result, Err(SubmitError::AtCapacity)));
        // Only the first record exists.
        assert_eq!(h.jobs.count().unwrap(), 1);
    }
}
