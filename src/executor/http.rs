//! Reference executor: plain streaming HTTP download

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::fetcher::{FetchError, FetchRequest, MediaFetcher, Result};
use crate::progress::ProgressSink;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Abort the fetch once the artifact grows past this many bytes.
    pub max_artifact_bytes: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3600),
            user_agent: format!("mediafetch/{}", env!("CARGO_PKG_VERSION")),
            max_artifact_bytes: None,
        }
    }
}

/// Direct-download executor for plain media URLs.
///
/// Streams the response body to the job's output path, reporting percent
/// progress from Content-Length when the server provides one.
pub struct HttpFetcher {
    client: Client,
    max_artifact_bytes: Option<u64>,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            max_artifact_bytes: config.max_artifact_bytes,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> Result<()> {
        debug!(job_id = %request.job_id, url = %request.url, "Starting download");

        let response = self.client.get(&request.url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_redirect() {
                FetchError::TooManyRedirects
            } else {
                FetchError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        if let (Some(max), Some(total)) = (self.max_artifact_bytes, total) {
            if total > max {
                return Err(FetchError::TooLarge(total));
            }
        }

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&request.output_path).await?;

        sink.on_progress(0.0);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    discard_partial(&request.output_path).await;
                    return Err(FetchError::RequestFailed(format!(
                        "Failed to read body: {}",
                        error
                    )));
                }
            };

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(max) = self.max_artifact_bytes {
                if written > max {
                    drop(file);
                    discard_partial(&request.output_path).await;
                    return Err(FetchError::TooLarge(written));
                }
            }
            if let Some(total) = total {
                sink.on_progress(written as f64 / total as f64 * 100.0);
            }
        }

        file.flush().await?;
        sink.on_progress(100.0);

        debug!(job_id = %request.job_id, size = written, "Download completed");
        Ok(())
    }
}

/// Best-effort removal of a half-written artifact.
async fn discard_partial(path: &std::path::Path) {
    let _ = tokio::fs::remove_file(path).await;
}
