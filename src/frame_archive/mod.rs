//! FrameArchive - External Archive Adapter
//!
//! ## Responsibilities
//!
//! - Fetch historical frames for dashboard queries
//! - Forward enriched ingest payloads with retry-with-backoff
//!
//! The archive is an external collaborator: unconfigured URLs make both
//! directions a quiet no-op, and forwarding is at-least-once with a
//! fixed backoff schedule and a terminal failure log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::Result;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FORWARD_ATTEMPTS: u32 = 10;
/// Delay before retry n; the last entry repeats for remaining attempts.
const FORWARD_BACKOFF_SECS: [u64; 8] = [1, 2, 5, 10, 20, 30, 60, 120];

/// Archive endpoints and credentials.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    pub query_url: Option<String>,
    pub ingest_url: Option<String>,
    pub bearer_token: Option<String>,
}

/// HTTP adapter for the frame archive.
pub struct FrameArchive {
    http: reqwest::Client,
    config: ArchiveConfig,
}

impl FrameArchive {
    pub fn new(config: ArchiveConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Fetch raw frames for a filter set. An unconfigured query URL or a
    /// non-success response yields an empty list; only transport errors
    /// surface to the caller.
    pub async fn fetch_frames(&self, filters: &HashMap<String, String>) -> Result<Vec<Value>> {
        let Some(url) = &self.config.query_url else {
            return Ok(Vec::new());
        };

        let mut request = self
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .query(filters)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            tracing::warn!(
                url = %url,
                status = %response.status(),
                "Archive query returned non-success status"
            );
            return Ok(Vec::new());
        }

        let body: Value = response.json().await?;
        let frames = body
            .get("frames")
            .or_else(|| body.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(frames)
    }

    /// Forward one enriched payload in the background, retrying on the
    /// fixed backoff schedule and logging a terminal failure after the
    /// last attempt.
    pub fn forward(self: &Arc<Self>, payload: Value) {
        let archive = self.clone();
        tokio::spawn(async move {
            archive.forward_with_retry(payload).await;
        });
    }

    async fn forward_with_retry(&self, payload: Value) {
        let Some(url) = &self.config.ingest_url else {
            tracing::info!("Archive ingest URL not configured, skipping forward");
            return;
        };

        let player_uuid = payload
            .get("playerUUID")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let timestamp = payload.get("timestamp").and_then(Value::as_i64);

        for attempt in 1..=MAX_FORWARD_ATTEMPTS {
            match self.try_forward(url, &payload).await {
                Ok(()) => {
                    tracing::info!(
                        url = %url,
                        player_uuid = %player_uuid,
                        timestamp = timestamp,
                        attempt = attempt,
                        "Frame forwarded to archive"
                    );
                    return;
                }
                Err(reason) => {
                    tracing::warn!(
                        url = %url,
                        player_uuid = %player_uuid,
                        attempt = attempt,
                        reason = %reason,
                        "Archive forward failed, will retry"
                    );
                }
            }

            if attempt < MAX_FORWARD_ATTEMPTS {
                let idx = ((attempt - 1) as usize).min(FORWARD_BACKOFF_SECS.len() - 1);
                tokio::time::sleep(Duration::from_secs(FORWARD_BACKOFF_SECS[idx])).await;
            }
        }

        tracing::error!(
            player_uuid = %player_uuid,
            timestamp = timestamp,
            attempts = MAX_FORWARD_ATTEMPTS,
            "Archive forward failed permanently"
        );
    }

    async fn try_forward(&self, url: &str, payload: &Value) -> std::result::Result<(), String> {
        let mut request = self
            .http
            .post(url)
            .timeout(FORWARD_TIMEOUT)
            .header(reqwest::header::ACCEPT, "application/json")
            // The archive ingest endpoint takes a batch
            .json(&[payload]);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unconfigured_fetch_is_empty() {
        let archive = FrameArchive::new(ArchiveConfig::default());
        let frames = archive.fetch_frames(&HashMap::new()).await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_forward_is_noop() {
        let archive = Arc::new(FrameArchive::new(ArchiveConfig::default()));
        archive.forward(json!({"timestamp": 1}));
        // Nothing to await on: the spawned task logs and returns
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_backoff_schedule_is_bounded() {
        let last = FORWARD_BACKOFF_SECS.len() - 1;
        for attempt in 1..=MAX_FORWARD_ATTEMPTS {
            let idx = ((attempt - 1) as usize).min(last);
            assert!(FORWARD_BACKOFF_SECS[idx] <= 120);
        }
    }
}
