use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;

use axum::body::Body;
use axum::http::header;
use axum::{Json, extract::Query, extract::State, http::StatusCode, response::IntoResponse};
use futures_util::StreamExt;
use tracing::info;

use super::error::ApiError;
use super::models::{
    DeleteJobResponse, HealthResponse, HistoryQuery, HistoryResponse, JobAcceptedResponse, JobView,
    StartDownloadRequest,
};
use super::state::AppState;
use crate::artifacts::{self, DeleteOutcome};
use crate::platform::detect_platform;
use crate::progress::stream_progress;
use crate::retry::RetryOverrides;
use crate::store::{JobStatus, NewJob};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Start a download (POST /downloads)
///
/// Commits a job record, launches the background fetch, and answers 202
/// with the job id; progress is consumed separately via the progress
/// stream. When the admission gate reports the system at capacity the
/// request is rejected up front with 503, before any record exists.
pub async fn start_download(
    State(state): State<AppState>,
    Json(request): Json<StartDownloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.url.trim().is_empty() {
        return Err(ApiError::InvalidPayload("url is required".to_string()));
    }

    let platform = detect_platform(&request.url);
    let new_job = NewJob::new(
        request.url.clone(),
        platform.to_string(),
        request.media_type,
        request.format_or_default(),
        request.quality_or_default(),
    );

    let record = state.orchestrator.submit(new_job)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            job_id: record.job_id,
        }),
    ))
}

/// Job detail (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .jobs
        .get(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok((StatusCode::OK, Json(JobView::from(record))))
}

/// Download history (GET /jobs), most recent first, optionally filtered
/// by status and/or platform.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let records = if query.status.is_none() && query.platform.is_none() {
        state.jobs.list_recent(limit)?
    } else {
        state
            .jobs
            .filter(query.status, query.platform.as_deref(), limit)?
    };

    let items: Vec<JobView> = records.into_iter().map(JobView::from).collect();
    let total = items.len();

    Ok((
        StatusCode::OK,
        Json(HistoryResponse {
            items,
            total,
            limit,
        }),
    ))
}

/// Delete a job and its artifact (DELETE /jobs/{job_id})
///
/// Running jobs cannot be deleted. The artifact is removed best-effort
/// and only when it resolves inside the output directory; a refusal is
/// reported in the response, never raised, and the record is deleted
/// regardless.
pub async fn delete_job(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .jobs
        .get(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    if record.status == JobStatus::Running {
        return Err(ApiError::JobRunning(job_id));
    }

    let (file_removed, note) = if record.file_path.is_empty() {
        (false, None)
    } else {
        let outcome = artifacts::delete_guarded(
            Path::new(&record.file_path),
            &state.config.download.output_dir,
        );
        match outcome {
            DeleteOutcome::Deleted => (true, None),
            DeleteOutcome::AlreadyGone => (false, None),
            DeleteOutcome::OutsideRoot => (
                false,
                Some("file path resolves outside the download directory; not deleted".to_string()),
            ),
            DeleteOutcome::NotAFile => {
                (false, Some("file path is not a regular file; not deleted".to_string()))
            }
            DeleteOutcome::Failed(reason) => (false, Some(format!("file delete failed: {reason}"))),
        }
    };

    state.jobs.delete(&job_id)?;
    info!(job_id = %job_id, file_removed, "Job deleted");

    Ok((
        StatusCode::OK,
        Json(DeleteJobResponse {
            status: "deleted".to_string(),
            job_id,
            file_removed,
            note,
        }),
    ))
}

/// Live progress stream (GET /progress/{job_id})
///
/// One event per state change, framed exactly as
/// `data:<percent>[|<file_name>]` or `data:ERROR:<message>`. The stream
/// ends on a terminal job state or the configured hard ceiling; a
/// disconnecting client just drops the body, which cancels the poll loop
/// at its next suspension point.
pub async fn progress(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> impl IntoResponse {
    let frames = stream_progress(
        state.jobs.clone(),
        job_id,
        state.config.stream.subscriber(),
    )
    .map(|event| Ok::<_, Infallible>(format!("data:{}\n\n", event.payload())));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
}

/// Admission ledger snapshot (GET /admission)
pub async fn admission_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.admission.status()?;
    Ok((StatusCode::OK, Json(status)))
}

/// Retry budget and lineage for a job (GET /jobs/{job_id}/retry)
pub async fn retry_info(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.retries.info(&job_id)?;
    Ok((StatusCode::OK, Json(info)))
}

/// Create and launch a retry for a failed job (POST /jobs/{job_id}/retry)
pub async fn create_retry(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.retries.create_retry(&job_id, RetryOverrides::default())?;
    state.metrics.retry_created();

    state.orchestrator.launch(&record);
    info!(job_id = %record.job_id, parent_job_id = %job_id, "Retry launched");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            job_id: record.job_id,
        }),
    ))
}

/// Health check endpoint (GET /health)
///
/// Reports per-component health (state store reachability, admission
/// ledger readability) and answers 503 when any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "store".to_string(),
        match state.jobs.count() {
            Ok(_) => "healthy".to_string(),
            Err(error) => format!("unhealthy: {error}"),
        },
    );
    components.insert(
        "admission".to_string(),
        match state.admission.status() {
            Ok(status) if status.active <= status.max => "healthy".to_string(),
            Ok(_) => "at_capacity".to_string(),
            Err(error) => format!("unhealthy: {error}"),
        },
    );

    let all_healthy = components
        .values()
        .all(|status| !status.starts_with("unhealthy"));
    let overall_status = if all_healthy { "healthy" } else { "unhealthy" };

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
