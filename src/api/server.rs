use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{
        admission_status, create_retry, delete_job, get_job, health, list_jobs, progress,
        retry_info, start_download,
    },
    state::AppState,
};
use crate::admission::AdmissionController;
use crate::config::Config;
use crate::executor::{HttpConfig, HttpFetcher};
use crate::observability::Metrics;
use crate::orchestrator::DownloadOrchestrator;
use crate::retry::RetryTracker;
use crate::store::{JobStore, KvStore};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the application router over a prepared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/downloads", post(start_download))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job).delete(delete_job))
        .route("/jobs/{job_id}/retry", get(retry_info).post(create_retry))
        .route("/progress/{job_id}", get(progress))
        .route("/admission", get(admission_status))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    // Load config
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    std::fs::create_dir_all(&config.download.output_dir)
        .map_err(|e| format!("Failed to create output directory: {}", e))?;

    // Open the shared state store
    info!(path = %config.store.path.display(), "Opening state store");
    let kv = Arc::new(
        KvStore::open(&config.store.path).map_err(|e| format!("Failed to open store: {}", e))?,
    );

    let jobs = Arc::new(JobStore::new(
        kv.clone(),
        Duration::from_secs(config.store.job_ttl_secs),
    ));

    let admission = Arc::new(AdmissionController::new(
        kv,
        config.admission.max_concurrent,
        config.admission.max_queue_size,
        config.admission.acquire_poll(),
    ));
    // Slots leaked by a crashed worker come back here, and only here.
    admission
        .reset()
        .map_err(|e| format!("Failed to reset admission ledger: {}", e))?;

    let retries = Arc::new(RetryTracker::new(jobs.clone(), config.retry.max_retries));

    let fetcher = Arc::new(
        HttpFetcher::new(HttpConfig {
            max_artifact_bytes: Some(config.download.max_artifact_size.as_u64()),
            ..HttpConfig::default()
        })
        .map_err(|e| format!("Failed to build HTTP fetcher: {}", e))?,
    );

    let metrics = Arc::new(Metrics::new());

    let orchestrator = Arc::new(DownloadOrchestrator::new(
        jobs.clone(),
        admission.clone(),
        fetcher,
        metrics.clone(),
        config.download.output_dir.clone(),
        config.admission.acquire_timeout(),
    ));

    let state = AppState::new(config, jobs, admission, retries, orchestrator, metrics);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediafetch API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
