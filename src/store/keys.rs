/// Key layout for the shared state store
///
/// Logical keys (the store separates value kinds into partitions):
/// - `job:{job_id}` -> job record (string-keyed field map)
/// - `jobs:all` -> recency index (list of job ids, most recent first)
/// - `admission:count` -> active slot counter
/// - `admission:active` -> set of job ids holding a slot
/// - `admission:queue` -> FIFO list of job ids waiting for a slot

/// Recency-ordered index of all job ids.
pub const JOBS_INDEX: &str = "jobs:all";

/// Active slot counter for the admission ledger.
pub const ADMISSION_COUNT: &str = "admission:count";

/// Set of job ids currently holding a slot.
pub const ADMISSION_ACTIVE: &str = "admission:active";

/// FIFO queue of job ids waiting for a slot.
pub const ADMISSION_QUEUE: &str = "admission:queue";

/// Encode a job key: job:{job_id}
pub fn job_key(job_id: &str) -> String {
    format!("job:{}", job_id)
}

/// Decode a job key: job:{job_id} -> job_id
pub fn job_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("job:")
}
