//! Output artifact conventions
//!
//! Artifacts are named from the job id (`video_{job_id}.mp4`), so
//! completion can find a job's output deterministically: concurrent jobs
//! can never pick up each other's files, which a newest-file-wins scan
//! cannot promise. The stem scan in [`locate`] exists only for executors
//! that pick their own extension; it still keys on the job id.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::store::MediaType;

/// Canonical file name for a job's artifact.
pub fn output_file_name(media_type: MediaType, job_id: &str, format: &str) -> String {
    format!("{}_{}.{}", media_type.as_str(), job_id, format)
}

/// Canonical path for a job's artifact inside the output directory.
pub fn output_path(dir: &Path, media_type: MediaType, job_id: &str, format: &str) -> PathBuf {
    dir.join(output_file_name(media_type, job_id, format))
}

/// Locate the artifact produced for a job.
///
/// The expected (job-id-derived) path wins. When the executor chose a
/// different extension, fall back to a scan for any file whose stem ends
/// with the job id. There is deliberately no "most recent file" heuristic.
pub fn locate(dir: &Path, job_id: &str, expected: &Path) -> Option<PathBuf> {
    if expected.is_file() {
        return Some(expected.to_path_buf());
    }

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let stem_matches = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.ends_with(job_id));
        if stem_matches {
            debug!(job_id, path = %path.display(), "Artifact located by stem scan");
            return Some(path);
        }
    }
    None
}

/// Result of a guarded artifact deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
    /// The path resolves outside the output directory; nothing deleted.
    OutsideRoot,
    NotAFile,
    Failed(String),
}

impl DeleteOutcome {
    pub fn removed(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

/// Delete an artifact, but only if it resolves to a regular file inside
/// the output directory after normalization. Failures are reported, never
/// raised: record deletion proceeds regardless.
pub fn delete_guarded(path: &Path, root: &Path) -> DeleteOutcome {
    if path.as_os_str().is_empty() || !path.exists() {
        return DeleteOutcome::AlreadyGone;
    }

    let Ok(resolved) = path.canonicalize() else {
        return DeleteOutcome::Failed(format!("cannot resolve {}", path.display()));
    };
    let Ok(resolved_root) = root.canonicalize() else {
        return DeleteOutcome::Failed(format!("cannot resolve root {}", root.display()));
    };

    if !resolved.starts_with(&resolved_root) {
        warn!(path = %path.display(), "Blocked delete outside the output directory");
        return DeleteOutcome::OutsideRoot;
    }

    if !resolved.is_file() {
        return DeleteOutcome::NotAFile;
    }

    match std::fs::remove_file(&resolved) {
        Ok(()) => DeleteOutcome::Deleted,
        Err(error) => {
            warn!(path = %resolved.display(), %error, "Artifact delete failed");
            DeleteOutcome::Failed(error.to_string())
        }
    }
}
