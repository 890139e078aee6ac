use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// State store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Record expiry; refreshed on every update.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            job_ttl_secs: default_job_ttl_secs(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store")
}

fn default_job_ttl_secs() -> u64 {
    86400 // 24 hours
}

/// Download/artifact configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_artifact_size")]
    pub max_artifact_size: ByteSize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_artifact_size: default_max_artifact_size(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_max_artifact_size() -> ByteSize {
    ByteSize(50 * 1024 * 1024 * 1024) // 50 GB
}

/// Admission control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Downloads allowed to run at once across all processes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Active + queued bound; requests past it are rejected up front.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,
    /// How long a job waits for a slot before failing.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Sleep between slot attempts while waiting.
    #[serde(default = "default_acquire_poll_ms")]
    pub acquire_poll_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            acquire_poll_ms: default_acquire_poll_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn acquire_poll(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_ms)
    }
}

fn default_max_concurrent() -> u32 {
    2
}

fn default_max_queue_size() -> u32 {
    50
}

fn default_acquire_timeout_secs() -> u64 {
    300
}

fn default_acquire_poll_ms() -> u64 {
    1000
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Progress stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Ticks with a running job stuck at zero progress before the stall
    /// guard fails it.
    #[serde(default = "default_stall_ticks")]
    pub stall_ticks: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_duration_secs: default_max_duration_secs(),
            stall_ticks: default_stall_ticks(),
        }
    }
}

impl StreamConfig {
    pub fn subscriber(&self) -> crate::progress::SubscriberConfig {
        crate::progress::SubscriberConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_duration: Duration::from_secs(self.max_duration_secs),
            stall_ticks: self.stall_ticks,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_max_duration_secs() -> u64 {
    600 // 10 minutes
}

fn default_stall_ticks() -> u64 {
    100
}
