/// Fjall-based shared state store for job records and the admission ledger
///
/// This module is the ground truth every other component reads and writes.
/// It uses Fjall (an embedded LSM key-value store) to persist:
///
/// - Job records (string-keyed field maps with per-key expiry)
/// - The recency index of job ids (most recent first)
/// - The admission ledger (slot counter, active set, wait queue)
///
/// ## Atomicity
///
/// `KvStore` exposes only atomic primitives (field merge, push-if-absent,
/// counter increment/decrement). Application code must express every
/// mutation through one of them, never a read-modify-write of its own.
///
/// ## Staleness
///
/// Records carry an expiry that is refreshed on every update, so dead jobs
/// age out without a garbage collector. Readers treat expired records as
/// absent; the recency index tolerates ids whose record is gone.
///
/// ## Usage
///
/// ```rust,ignore
/// use mediafetch::store::{JobStore, KvStore};
///
/// let kv = Arc::new(KvStore::open("data/store")?);
/// let jobs = JobStore::new(kv, Duration::from_secs(86400));
/// let record = jobs.create(new_job)?;
/// jobs.update(&record.job_id, JobUpdate::status(JobStatus::Running))?;
/// ```

pub mod error;
pub mod jobs;
pub mod keys;
pub mod kv;

pub use error::{Result, StoreError};
pub use jobs::{JobRecord, JobStatus, JobStore, JobUpdate, MediaType, NewJob};
pub use kv::{KvStore, now_secs};
