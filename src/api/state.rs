use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::observability::Metrics;
use crate::orchestrator::DownloadOrchestrator;
use crate::retry::RetryTracker;
use crate::store::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: Arc<JobStore>,
    pub admission: Arc<AdmissionController>,
    pub retries: Arc<RetryTracker>,
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: Arc<JobStore>,
        admission: Arc<AdmissionController>,
        retries: Arc<RetryTracker>,
        orchestrator: Arc<DownloadOrchestrator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jobs,
            admission,
            retries,
            orchestrator,
            metrics,
        }
    }
}
