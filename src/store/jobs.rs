use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::{Result, StoreError};
use super::keys;
use super::kv::{KvStore, now_secs};

/// Requested media kind, fixed at job creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }

    /// Tolerant parse; unrecognized values read as video.
    pub fn parse(value: &str) -> Self {
        match value {
            "audio" => MediaType::Audio,
            _ => MediaType::Video,
        }
    }
}

/// Job life cycle state.
///
/// ```text
/// queued -> running -> done | error
/// queued | running -> cancelled (reserved)
/// ```
/// `done`, `error` and `cancelled` are terminal for the record itself;
/// a retry is a new record, never a transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Tolerant parse; unrecognized values read as queued.
    pub fn parse(value: &str) -> Self {
        match value {
            "running" => JobStatus::Running,
            "done" => JobStatus::Done,
            "error" => JobStatus::Error,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }
}

/// Persisted state of one fetch attempt.
///
/// Stored as a string-keyed scalar field map; numeric fields are parsed
/// back on read and tolerate legacy records where a field is absent
/// (read as 0/empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
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
    pub retry_count: u32,
    pub parent_job_id: String,
    pub child_job_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobRecord {
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("job_id".into(), self.job_id.clone());
        fields.insert("url".into(), self.url.clone());
        fields.insert("platform".into(), self.platform.clone());
        fields.insert("media_type".into(), self.media_type.as_str().into());
        fields.insert("format".into(), self.format.clone());
        fields.insert("quality".into(), self.quality.clone());
        fields.insert("status".into(), self.status.as_str().into());
        fields.insert("progress".into(), format_progress(self.progress));
        fields.insert("file_name".into(), self.file_name.clone());
        fields.insert("file_path".into(), self.file_path.clone());
        fields.insert("error".into(), self.error.clone());
        fields.insert("retry_count".into(), self.retry_count.to_string());
        fields.insert("parent_job_id".into(), self.parent_job_id.clone());
        fields.insert("child_job_id".into(), self.child_job_id.clone());
        fields.insert("created_at".into(), self.created_at.to_string());
        fields.insert("updated_at".into(), self.updated_at.to_string());
        fields
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        let text = |name: &str| fields.get(name).cloned().unwrap_or_default();
        Self {
            job_id: text("job_id"),
            url: text("url"),
            platform: text("platform"),
            media_type: MediaType::parse(&text("media_type")),
            format: text("format"),
            quality: text("quality"),
            status: JobStatus::parse(&text("status")),
            progress: parse_f64(fields, "progress"),
            file_name: text("file_name"),
            file_path: text("file_path"),
            error: text("error"),
            retry_count: parse_i64(fields, "retry_count").max(0) as u32,
            parent_job_id: text("parent_job_id"),
            child_job_id: text("child_job_id"),
            created_at: parse_i64(fields, "created_at"),
            updated_at: parse_i64(fields, "updated_at"),
        }
    }
}

fn parse_f64(fields: &BTreeMap<String, String>, name: &str) -> f64 {
    fields
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0)
}

fn parse_i64(fields: &BTreeMap<String, String>, name: &str) -> i64 {
    fields
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn format_progress(progress: f64) -> String {
    format!("{:.1}", progress)
}

/// Request parameters for a new job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub platform: String,
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
    pub retry_count: u32,
    pub parent_job_id: String,
}

impl NewJob {
    pub fn new(url: String, platform: String, media_type: MediaType, format: String, quality: String) -> Self {
        Self {
            url,
            platform,
            media_type,
            format,
            quality,
            retry_count: 0,
            parent_job_id: String::new(),
        }
    }
}

/// Partial update; only the named fields change.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub error: Option<String>,
    pub child_job_id: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), status.as_str().into());
        }
        if let Some(progress) = self.progress {
            fields.insert("progress".into(), format_progress(progress));
        }
        if let Some(file_name) = &self.file_name {
            fields.insert("file_name".into(), file_name.clone());
        }
        if let Some(file_path) = &self.file_path {
            fields.insert("file_path".into(), file_path.clone());
        }
        if let Some(error) = &self.error {
            fields.insert("error".into(), error.clone());
        }
        if let Some(child_job_id) = &self.child_job_id {
            fields.insert("child_job_id".into(), child_job_id.clone());
        }
        fields
    }
}

/// Durable (TTL-bounded) job record store plus recency index.
pub struct JobStore {
    kv: Arc<KvStore>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(kv: Arc<KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Create a new record with generated id, defaults for everything the
    /// caller did not supply, and a fresh expiry. The id lands at the head
    /// of the recency index.
    pub fn create(&self, new: NewJob) -> Result<JobRecord> {
        let now = now_secs();
        let record = JobRecord {
            job_id: Uuid::now_v7().to_string(),
            url: new.url,
            platform: new.platform,
            media_type: new.media_type,
            format: new.format,
            quality: new.quality,
            status: JobStatus::Queued,
            progress: 0.0,
            file_name: String::new(),
            file_path: String::new(),
            error: String::new(),
            retry_count: new.retry_count,
            parent_job_id: new.parent_job_id,
            child_job_id: String::new(),
            created_at: now,
            updated_at: now,
        };

        let key = keys::job_key(&record.job_id);
        self.kv.hash_merge(&key, &record.to_fields())?;
        self.kv.list_push_front(keys::JOBS_INDEX, &record.job_id)?;
        self.kv.expire(&key, self.ttl)?;

        debug!(job_id = %record.job_id, "Job record created");
        Ok(record)
    }

    /// Fetch a record; expired records read as absent.
    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let fields = self.kv.hash_get(&keys::job_key(job_id))?;
        Ok(fields.map(|fields| JobRecord::from_fields(&fields)))
    }

    /// Partial merge. Always stamps `updated_at` and refreshes the expiry.
    /// Fails with `NotFound` when the record does not exist (no upsert).
    pub fn update(&self, job_id: &str, update: JobUpdate) -> Result<()> {
        let key = keys::job_key(job_id);
        let mut fields = update.to_fields();
        fields.insert("updated_at".into(), now_secs().to_string());

        if !self.kv.hash_update(&key, &fields)? {
            return Err(StoreError::NotFound(job_id.to_string()));
        }
        self.kv.expire(&key, self.ttl)?;
        Ok(())
    }

    /// Delete the record and drop it from the recency index.
    pub fn delete(&self, job_id: &str) -> Result<bool> {
        let removed = self.kv.hash_delete(&keys::job_key(job_id))?;
        self.kv.list_remove(keys::JOBS_INDEX, job_id)?;
        Ok(removed)
    }

    /// Recent records, most recent first. Index entries whose record has
    /// expired are skipped, not errors.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let limit = limit.clamp(1, 1000);
        let ids = self.kv.list_range(keys::JOBS_INDEX, Some(limit))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Recent records matching the given status/platform filters.
    pub fn filter(
        &self,
        status: Option<JobStatus>,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<JobRecord>> {
        let limit = limit.clamp(1, 1000);
        // Over-fetch so filters still fill the page from recent history.
        let candidates = self.list_recent((limit * 3).min(1000))?;
        Ok(candidates
            .into_iter()
            .filter(|record| status.is_none_or(|wanted| record.status == wanted))
            .filter(|record| platform.is_none_or(|wanted| record.platform == wanted))
            .take(limit)
            .collect())
    }

    /// Total number of ids in the recency index (expired included until
    /// their index entry is observed and skipped by a reader).
    pub fn count(&self) -> Result<usize> {
        self.kv.list_len(keys::JOBS_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (JobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(temp_dir.path().join("test_store")).unwrap());
        (JobStore::new(kv, Duration::from_secs(86400)), temp_dir)
    }

    fn video_job(url: &str) -> NewJob {
        NewJob::new(
            url.to_string(),
            "youtube".to_string(),
            MediaType::Video,
            "mp4".to_string(),
            "720".to_string(),
        )
    }

    #[test]
    fn test_create_fills_defaults() {
        let (store, _temp) = create_test_store();

        let record = store.create(video_job("https://youtube.com/watch?v=abc")).unwrap();

        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.retry_count, 0);
        assert!(record.file_name.is_empty());
        assert!(record.error.is_empty());
        assert_eq!(record.created_at, record.updated_at);

        let loaded = store.get(&record.job_id).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_update_merges_and_stamps() {
        let (store, _temp) = create_test_store();
        let record = store.create(video_job("https://youtube.com/watch?v=abc")).unwrap();

        store
            .update(
                &record.job_id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    progress: Some(42.5),
                    ..Default::default()
                },
            )
            .unwrap();

        let loaded = store.get(&record.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.progress, 42.5);
        // Untouched fields survive the merge.
        assert_eq!(loaded.url, record.url);
        assert_eq!(loaded.quality, record.quality);
    }

    #[test]
    fn test_update_is_idempotent_except_timestamp() {
        let (store, _temp) = create_test_store();
        let record = store.create(video_job("https://youtube.com/watch?v=abc")).unwrap();

        let update = JobUpdate {
            progress: Some(50.0),
            ..Default::default()
        };
        store.update(&record.job_id, update.clone()).unwrap();
        let first = store.get(&record.job_id).unwrap().unwrap();

        store.update(&record.job_id, update).unwrap();
        let second = store.get(&record.job_id).unwrap().unwrap();

        assert_eq!(
            JobRecord {
                updated_at: 0,
                ..first
            },
            JobRecord {
                updated_at: 0,
                ..second
            }
        );
    }

    #[test]
    fn test_update_missing_is_not_found_and_no_upsert() {
        let (store, _temp) = create_test_store();

        let result = store.update("no-such-job", JobUpdate::status(JobStatus::Running));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(store.get("no-such-job").unwrap().is_none());
    }

    #[test]
    fn test_list_recent_most_recent_first() {
        let (store, _temp) = create_test_store();

        let first = store.create(video_job("https://youtube.com/1")).unwrap();
        let second = store.create(video_job("https://youtube.com/2")).unwrap();
        let third = store.create(video_job("https://youtube.com/3")).unwrap();

        let recent = store.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].job_id, third.job_id);
        assert_eq!(recent[1].job_id, second.job_id);

        assert_eq!(store.count().unwrap(), 3);
        let _ = first;
    }

    #[test]
    fn test_list_recent_skips_expired_records() {
        let (store, _temp) = create_test_store();

        let stale = store.create(video_job("https://youtube.com/old")).unwrap();
        let fresh = store.create(video_job("https://youtube.com/new")).unwrap();

        store
            .kv
            .expire(&keys::job_key(&stale.job_id), Duration::from_secs(0))
            .unwrap();

        let recent = store.list_recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].job_id, fresh.job_id);
    }

    #[test]
    fn test_filter_by_status_and_platform() {
        let (store, _temp) = create_test_store();

        let failed = store.create(video_job("https://youtube.com/1")).unwrap();
        store
            .update(&failed.job_id, JobUpdate::failed("boom"))
            .unwrap();
        let queued = store.create(video_job("https://youtube.com/2")).unwrap();

        let errors = store.filter(Some(JobStatus::Error), None, 10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].job_id, failed.job_id);

        let tiktok = store.filter(None, Some("tiktok"), 10).unwrap();
        assert!(tiktok.is_empty());
        let _ = queued;
    }

    #[test]
    fn test_delete_removes_record_and_index_entry() {
        let (store, _temp) = create_test_store();
        let record = store.create(video_job("https://youtube.com/1")).unwrap();

        assert!(store.delete(&record.job_id).unwrap());
        assert!(store.get(&record.job_id).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.delete(&record.job_id).unwrap());
    }

    #[test]
    fn test_legacy_record_tolerates_missing_fields() {
        let fields: BTreeMap<String, String> = [
            ("job_id".to_string(), "legacy".to_string()),
            ("url".to_string(), "https://youtube.com/x".to_string()),
            ("status".to_string(), "done".to_string()),
        ]
        .into_iter()
        .collect();

        let record = JobRecord::from_fields(&fields);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.created_at, 0);
        assert!(record.parent_job_id.is_empty());
        assert_eq!(record.media_type, MediaType::Video);
        assert_eq!(record.status, JobStatus::Done);
    }

    #[test]
    fn test_field_round_trip() {
        let (store, _temp) = create_test_store();
        let record = store.create(video_job("https://youtube.com/rt")).unwrap();

        let decoded = JobRecord::from_fields(&record.to_fields());
        assert_eq!(decoded, record);
    }
}
