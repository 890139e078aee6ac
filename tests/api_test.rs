use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use async_trait::async_trait;
use mediafetch::admission::AdmissionController;
use mediafetch::api::models::{DeleteJobResponse, HistoryResponse, JobAcceptedResponse, JobView};
use mediafetch::api::state::AppState;
use mediafetch::config::Config;
use mediafetch::fetcher::{FetchError, FetchRequest, MediaFetcher};
use mediafetch::observability::Metrics;
use mediafetch::orchestrator::DownloadOrchestrator;
use mediafetch::progress::ProgressSink;
use mediafetch::retry::RetryTracker;
use mediafetch::store::{JobStatus, JobStore, KvStore};

/// Scripted executor: behavior keyed off the URL so one app instance can
/// drive every test case.
/// - URLs containing "fail" return a fetch error
/// - URLs containing "hang" block for a long time
/// - anything else writes the artifact and succeeds
struct ScriptedFetcher;

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(), FetchError> {
        if request.url.contains("fail") {
            return Err(FetchError::RequestFailed("connection refused".to_string()));
        }
        if request.url.contains("hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }
        sink.on_progress(50.0);
        tokio::fs::write(&request.output_path, b"media bytes").await?;
        sink.on_progress(100.0);
        Ok(())
    }
}

/// Creates a test config with short timeouts and fast polling
fn create_test_config(output_dir: PathBuf) -> Config {
    let config_toml = r#"
[admission]
max_concurrent = 2
max_queue_size = 10
acquire_timeout_secs = 1
acquire_poll_ms = 10

[stream]
poll_interval_ms = 10
max_duration_secs = 2
stall_ticks = 5
    "#;

    let mut config: Config = toml::from_str(config_toml).expect("Failed to parse test config");
    config.download.output_dir = output_dir;
    config
}

/// Builds a test app with isolated dependencies
fn build_test_app() -> (Router, AppState, TempDir, TempDir) {
    let store_dir = TempDir::new().expect("Failed to create temp dir");
    let output_dir = TempDir::new().expect("Failed to create temp dir");

    let config = create_test_config(output_dir.path().to_path_buf());

    let kv = Arc::new(
        KvStore::open(store_dir.path().join("store")).expect("Failed to open test store"),
    );
    let jobs = Arc::new(JobStore::new(kv.clone(), Duration::from_secs(86400)));
    let admission = Arc::new(AdmissionController::new(
        kv,
        config.admission.max_concurrent,
        config.admission.max_queue_size,
        config.admission.acquire_poll(),
    ));
    let retries = Arc::new(RetryTracker::new(jobs.clone(), config.retry.max_retries));
    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        jobs.clone(),
        admission.clone(),
        Arc::new(ScriptedFetcher),
        metrics.clone(),
        config.download.output_dir.clone(),
        config.admission.acquire_timeout(),
    ));

    let state = AppState::new(config, jobs, admission, retries, orchestrator, metrics);
    let app = mediafetch::api::router(state.clone());

    (app, state, store_dir, output_dir)
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn wait_for_status(state: &AppState, job_id: &str, wanted: JobStatus) -> JobView {
    for _ in 0..300 {
        if let Some(record) = state.jobs.get(job_id).unwrap() {
            if record.status == wanted {
                return JobView::from(record);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {:?}", job_id, wanted);
}

fn start_body(url: &str) -> serde_json::Value {
    json!({
        "url": url,
        "media_type": "video",
    })
}

#[tokio::test]
async fn test_start_download_accepted_and_completes() {
    let (app, state, _store, _output) = build_test_app();

    let (status, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=ok"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    let view = wait_for_status(&state, &accepted.job_id, JobStatus::Done).await;

    assert_eq!(view.progress, 100.0);
    assert_eq!(view.platform, "youtube");
    assert_eq!(view.format, "mp4");
    assert!(view.file_name.starts_with("video_"));
    assert!(std::path::Path::new(&view.file_path).is_file());

    // The record is served back over the API.
    let (status, body) = get(&app, &format!("/jobs/{}", accepted.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    let served: JobView = serde_json::from_slice(&body).unwrap();
    assert_eq!(served.job_id, accepted.job_id);
    assert_eq!(served.status, JobStatus::Done);
}

#[tokio::test]
async fn test_start_download_rejects_empty_url() {
    let (app, _state, _store, _output) = build_test_app();

    let (status, body) = post_json(&app, "/downloads", start_body("  ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let (app, _state, _store, _output) = build_test_app();

    let (status, body) = get(&app, "/jobs/no-such-job").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_failed_download_carries_error_and_severity() {
    let (app, state, _store, _output) = build_test_app();

    let (status, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=fail"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Error).await;

    let (_, body) = get(&app, &format!("/jobs/{}", accepted.job_id)).await;
    let view: JobView = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        view.error,
        "Could not connect to the server. Check your internet connection."
    );
    assert!(view.severity.is_some());
}

#[tokio::test]
async fn test_history_lists_recent_jobs() {
    let (app, state, _store, _output) = build_test_app();

    for i in 0..3 {
        let (status, body) = post_json(
            &app,
            "/downloads",
            start_body(&format!("https://youtube.com/watch?v=ok{}", i)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
        wait_for_status(&state, &accepted.job_id, JobStatus::Done).await;
    }

    let (status, body) = get(&app, "/jobs?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let history: HistoryResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(history.items.len(), 2);
    assert_eq!(history.limit, 2);

    let (_, body) = get(&app, "/jobs?status=done").await;
    let history: HistoryResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(history.items.len(), 3);

    let (_, body) = get(&app, "/jobs?status=error").await;
    let history: HistoryResponse = serde_json::from_slice(&body).unwrap();
    assert!(history.items.is_empty());
}

#[tokio::test]
async fn test_delete_completed_job_removes_record_and_file() {
    let (app, state, _store, _output) = build_test_app();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=ok"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    let view = wait_for_status(&state, &accepted.job_id, JobStatus::Done).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", accepted.job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let deleted: DeleteJobResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(deleted.file_removed);
    assert!(deleted.note.is_none());
    assert!(!std::path::Path::new(&view.file_path).exists());

    let (status, _) = get(&app, &format!("/jobs/{}", accepted.job_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_running_job_is_refused() {
    let (app, state, _store, _output) = build_test_app();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=hang"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Running).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", accepted.job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Still there.
    let (status, _) = get(&app, &format!("/jobs/{}", accepted.job_id)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_rejects_file_outside_output_dir() {
    let (app, state, _store, _output) = build_test_app();

    let elsewhere = TempDir::new().unwrap();
    let foreign = elsewhere.path().join("important.mp4");
    std::fs::write(&foreign, b"do not touch").unwrap();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=fail"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Error).await;

    // Point the record at a file outside the output directory.
    state
        .jobs
        .update(
            &accepted.job_id,
            mediafetch::store::JobUpdate {
                file_path: Some(foreign.to_string_lossy().into_owned()),
                ..Default::default()
            },
        )
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", accepted.job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let deleted: DeleteJobResponse = serde_json::from_slice(&bytes).unwrap();

    // Security rejection is reported; the foreign file survives.
    assert!(!deleted.file_removed);
    assert!(deleted.note.unwrap().contains("outside the download directory"));
    assert!(foreign.exists());
}

#[tokio::test]
async fn test_admission_status_shape() {
    let (app, state, _store, _output) = build_test_app();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=hang"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Running).await;

    let (status, body) = get(&app, "/admission").await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["active"], 1);
    assert_eq!(snapshot["max"], 2);
    assert_eq!(snapshot["available_slots"], 1);
    assert_eq!(snapshot["queued"], 0);
    assert_eq!(snapshot["active_jobs"][0], accepted.job_id.as_str());
    assert!(snapshot["queued_jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_flow_over_api() {
    let (app, state, _store, _output) = build_test_app();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=fail"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Error).await;

    let (status, body) = get(&app, &format!("/jobs/{}/retry", accepted.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["can_retry"], true);
    assert_eq!(info["retry_count"], 0);
    assert_eq!(info["retries_remaining"], 3);

    let (status, body) = post_json(
        &app,
        &format!("/jobs/{}/retry", accepted.job_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let retried: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    assert_ne!(retried.job_id, accepted.job_id);

    // The retry job runs (and fails the same way, per the scripted URL).
    let view = wait_for_status(&state, &retried.job_id, JobStatus::Error).await;
    assert_eq!(view.retry_count, 1);
    assert_eq!(view.parent_job_id, accepted.job_id);

    // Retrying the original a second time is a conflict.
    let (status, body) = post_json(
        &app,
        &format!("/jobs/{}/retry", accepted.job_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "ALREADY_RETRIED");
}

#[tokio::test]
async fn test_retry_info_for_unknown_job_is_404() {
    let (app, _state, _store, _output) = build_test_app();

    let (status, _) = get(&app, "/jobs/no-such-job/retry").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_progress_stream_reports_unknown_job() {
    let (app, _state, _store, _output) = build_test_app();

    let (status, body) = get(&app, "/progress/no-such-job").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("data:ERROR:Job not found"), "body: {text}");
}

#[tokio::test]
async fn test_progress_stream_follows_job_to_completion() {
    let (app, state, _store, _output) = build_test_app();

    let (_, body) = post_json(
        &app,
        "/downloads",
        start_body("https://youtube.com/watch?v=ok"),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_slice(&body).unwrap();
    wait_for_status(&state, &accepted.job_id, JobStatus::Done).await;

    // Stream on a finished job: one event with percent and file name.
    let (status, body) = get(&app, &format!("/progress/{}", accepted.job_id)).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(
        text.contains(&format!("data:100.0|video_{}.mp4", accepted.job_id)),
        "body: {text}"
    );
}

#[tokio::test]
async fn test_health_reports_components() {
    let (app, _state, _store, _output) = build_test_app();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["store"], "healthy");
    assert_eq!(health["components"]["admission"], "healthy");
}
