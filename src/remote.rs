//! Remote sync API client
//!
//! Three endpoints: bulk table snapshots for ingestion, literal-statement
//! replay for the outbox, and multipart media upload. Transient transport
//! failures retry a configured number of times; HTTP rejections surface
//! with status and body so the dispatcher can log them per row.

use crate::config::RequestConfig;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of a remote snapshot: column name to JSON value
pub type RemoteRow = serde_json::Map<String, serde_json::Value>;

#[derive(Serialize)]
struct TableRequest<'a> {
    table: &'a str,
    context_id: i64,
}

#[derive(Serialize)]
struct ReplayRequest<'a> {
    query: &'a str,
}

/// HTTP client for the remote sync API
pub struct RemoteClient {
    client: Client,
    base_url: String,
    config: RequestConfig,
}

impl RemoteClient {
    /// Create a new client against a base URL
    pub fn new(base_url: &str, config: RequestConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    /// Fetch one entity's full snapshot.
    ///
    /// An empty or `null` body means "no data for this entity", not an
    /// error.
    pub async fn fetch_table(
        &self,
        table: &str,
        context_id: i64,
    ) -> Result<Vec<RemoteRow>, RemoteError> {
        let url = format!("{}/mobile/table", self.base_url);
        let request = TableRequest { table, context_id };

        let resp = self
            .send_with_retry(|| self.client.post(&url).json(&request))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let body = resp.text().await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }

        serde_json::from_str(trimmed).map_err(|e| RemoteError::Parse(e.to_string()))
    }

    /// Replay one rendered outbox statement
    pub async fn replay(&self, query: &str) -> Result<(), RemoteError> {
        let url = format!("{}/mobile/replay", self.base_url);
        let request = ReplayRequest { query };

        let resp = self
            .send_with_retry(|| self.client.post(&url).json(&request))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        Ok(())
    }

    /// Upload one captured media file as a multipart form
    pub async fn upload_media(&self, path: &Path, filename: &str) -> Result<(), RemoteError> {
        let url = format!("{}/mobile/media", self.base_url);
        let bytes = tokio::fs::read(path).await?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        Ok(())
    }

    /// Send a request, retrying connect/timeout failures per the config.
    /// HTTP-level rejections are not retried here; per-row handling is the
    /// dispatcher's job.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "transient request failure, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(RemoteError::Request(e)),
            }
        }
    }

    async fn api_error(resp: reqwest::Response) -> RemoteError {
        let status: StatusCode = resp.status();
        let body = resp.text().await.unwrap_or_default();
        RemoteError::Api {
            status: status.as_u16(),
            body,
        }
    }
}
