//! Admission control for concurrent downloads
//!
//! Caps how many fetch jobs run at once across every process sharing the
//! state store. The semaphore is the store's atomic counter plus an active
//! set and a wait queue; there is no process-local lock to coordinate
//! through, so the same discipline works with N request-handling processes
//! pointed at one store.
//!
//! ## Algorithm
//!
//! `acquire` increments the counter first and checks the result. Within the
//! limit: the job joins the active set and leaves the queue. Over the
//! limit: the increment is rolled back, the job queues up, and the caller
//! sleeps and retries until the deadline. The counter can overshoot the
//! limit for the instant between the increment and its rollback; that
//! window is the price of not holding a global lock across processes.
//!
//! ## Fairness
//!
//! The queue is FIFO in entry order, but grant order is best-effort: every
//! waiter retries independently and whichever next observes a free slot
//! wins. Strict FIFO grants are NOT guaranteed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::{KvStore, Result};
use crate::store::keys::{ADMISSION_ACTIVE, ADMISSION_COUNT, ADMISSION_QUEUE};

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    TimedOut,
}

/// Read-only snapshot for health and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub active: u32,
    pub max: u32,
    pub available_slots: u32,
    pub queued: usize,
    pub active_jobs: Vec<String>,
    pub queued_jobs: Vec<String>,
}

/// Process-shared download semaphore backed by the state store.
pub struct AdmissionController {
    kv: Arc<KvStore>,
    max_concurrent: u32,
    max_queue_size: u32,
    acquire_poll: Duration,
}

impl AdmissionController {
    pub fn new(kv: Arc<KvStore>, max_concurrent: u32, max_queue_size: u32, acquire_poll: Duration) -> Self {
        Self {
            kv,
            max_concurrent,
            max_queue_size,
            acquire_poll,
        }
    }

    /// Try to acquire a download slot, waiting up to `timeout`.
    ///
    /// On `TimedOut` the job stays in the wait queue; a later `acquire`
    /// for the same id picks up from there and removes it on grant.
    pub async fn acquire(&self, job_id: &str, timeout: Duration) -> Result<AcquireOutcome> {
        let started = Instant::now();

        loop {
            let count = self.kv.counter_incr(ADMISSION_COUNT)?;

            if count <= self.max_concurrent as i64 {
                self.kv.set_add(ADMISSION_ACTIVE, job_id)?;
                self.kv.list_remove(ADMISSION_QUEUE, job_id)?;
                debug!(job_id, slot = count, "Admission granted");
                return Ok(AcquireOutcome::Granted);
            }

            // Over the limit: roll the increment back and wait in line.
            self.kv.counter_decr(ADMISSION_COUNT)?;
            self.kv.list_push_back_unique(ADMISSION_QUEUE, job_id)?;

            if started.elapsed() >= timeout {
                debug!(job_id, "Admission timed out");
                return Ok(AcquireOutcome::TimedOut);
            }

            tokio::time::sleep(self.acquire_poll).await;
        }
    }

    /// Release a download slot.
    ///
    /// Safe to call without a matching successful `acquire` (crash
    /// recovery paths do): the counter is clamped at zero instead of
    /// drifting negative.
    pub fn release(&self, job_id: &str) -> Result<()> {
        self.kv.set_remove(ADMISSION_ACTIVE, job_id)?;

        let count = self.kv.counter_decr(ADMISSION_COUNT)?;
        if count < 0 {
            warn!(job_id, count, "Release without matching acquire, clamping counter");
            self.kv.counter_set(ADMISSION_COUNT, 0)?;
        }
        debug!(job_id, "Admission released");
        Ok(())
    }

    /// Snapshot of the ledger.
    pub fn status(&self) -> Result<AdmissionStatus> {
        let active = self.kv.counter_get(ADMISSION_COUNT)?.max(0) as u32;
        let active_jobs = self.kv.set_members(ADMISSION_ACTIVE)?;
        let queued_jobs = self.kv.list_range(ADMISSION_QUEUE, None)?;

        Ok(AdmissionStatus {
            active,
            max: self.max_concurrent,
            available_slots: self.max_concurrent.saturating_sub(active),
            queued: queued_jobs.len(),
            active_jobs,
            queued_jobs,
        })
    }

    /// Whether a new admission request may commit a job at all:
    /// active + queued must stay under the configured queue bound.
    pub fn has_capacity(&self) -> Result<bool> {
        let status = self.status()?;
        Ok(status.active as usize + status.queued < self.max_queue_size as usize)
    }

    /// Clear the ledger. Startup only; does not coordinate with in-flight
    /// `acquire` calls.
    pub fn reset(&self) -> Result<()> {
        self.kv.counter_set(ADMISSION_COUNT, 0)?;
        self.kv.set_clear(ADMISSION_ACTIVE)?;
        self.kv.list_clear(ADMISSION_QUEUE)?;
        debug!("Admission ledger reset");
        Ok(())
    }
}
