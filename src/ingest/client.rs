//! HTTP client for the ingest service.
//!
//! Uploads are retried on transient failures with capped exponential backoff:
//! the delay starts at the configured base, doubles per attempt, and never
//! exceeds [`RETRY_CAP_MS`]. Rejections with a 4xx status are permanent and
//! surface immediately as [`EngineError::IngestRejected`].

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::IngestSettings;
use crate::ingest::payload::{IngestAck, SessionPayload, VideoAck};
use crate::utils::errors::{EngineError, Result};

/// Upper bound on the backoff delay between attempts.
pub const RETRY_CAP_MS: u64 = 30_000;

/// File name the video part is submitted under.
const VIDEO_FILE_NAME: &str = "video.webm";

/// Client for the two ingest endpoints, configured once per engine.
pub struct IngestClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_base_ms: u64,
}

impl IngestClient {
    pub fn new(settings: &IngestSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if settings.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(settings.timeout_secs));
        }
        Ok(Self {
            http: builder.build()?,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            max_retries: settings.max_retries,
            retry_base_ms: settings.retry_base_ms,
        })
    }

    /// Submits a completed task's records to `POST /api/events`.
    pub async fn push_events(&self, payload: &SessionPayload) -> Result<IngestAck> {
        let url = format!("{}/api/events", self.endpoint);
        debug!(task = %payload.task, events = payload.events_recorded, "uploading event payload");
        self.with_retries("events", || {
            let req = self.authed(self.http.post(&url)).json(payload);
            async move { checked_json(req.send().await?).await }
        })
        .await
    }

    /// Submits the recorded video to `POST /api/events/video`, filed under
    /// the folder identifier returned by the events upload.
    pub async fn push_video(&self, folder_iso: &str, video: Bytes) -> Result<VideoAck> {
        let url = format!("{}/api/events/video", self.endpoint);
        debug!(folder_iso, bytes = video.len(), "uploading video");
        self.with_retries("video", || {
            // Multipart forms are consumed by send, so each attempt builds a
            // fresh one; cloning `Bytes` only bumps a refcount.
            let attempt = multipart::Part::stream(video.clone())
                .file_name(VIDEO_FILE_NAME)
                .mime_str("video/webm")
                .map(|part| {
                    let form = multipart::Form::new()
                        .text("folderIso", folder_iso.to_string())
                        .part("file", part);
                    self.authed(self.http.post(&url)).multipart(form)
                });
            async move { checked_json(attempt?.send().await?).await }
        })
        .await
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key.as_str()),
            None => req,
        }
    }

    async fn with_retries<T, F, Fut>(&self, what: &'static str, mut build: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay_ms = self.retry_base_ms;
        let mut attempt = 0u32;
        loop {
            match build().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(what, attempt, delay_ms, error = %err, "upload failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = next_delay(delay_ms);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Doubles the backoff delay up to [`RETRY_CAP_MS`].
fn next_delay(current_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(RETRY_CAP_MS)
}

async fn checked_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = format!(
        "{} {}",
        status.as_u16(),
        body.chars().take(200).collect::<String>()
    );
    if status.is_server_error() {
        Err(EngineError::UploadFailed(detail))
    } else {
        Err(EngineError::IngestRejected(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> IngestSettings {
        IngestSettings {
            endpoint: "http://ingest.test:8089/".into(),
            api_key: Some("k-123".into()),
            timeout_secs: 5,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = IngestClient::new(&settings()).unwrap();
        assert_eq!(client.endpoint, "http://ingest.test:8089");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut delay = 500;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay);
            delay = next_delay(delay);
        }
        assert_eq!(seen, vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_give_up() {
        let client = IngestClient::new(&settings()).unwrap();
        let mut calls = 0u32;
        let out: Result<()> = client
            .with_retries("events", || {
                calls += 1;
                async { Err(EngineError::UploadFailed("503 down".into())) }
            })
            .await;
        assert!(matches!(out, Err(EngineError::UploadFailed(_))));
        // Initial attempt plus max_retries.
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let client = IngestClient::new(&settings()).unwrap();
        let mut calls = 0u32;
        let out: Result<()> = client
            .with_retries("events", || {
                calls += 1;
                async { Err(EngineError::IngestRejected("400 bad payload".into())) }
            })
            .await;
        assert!(matches!(out, Err(EngineError::IngestRejected(_))));
        assert_eq!(calls, 1);
    }
}
