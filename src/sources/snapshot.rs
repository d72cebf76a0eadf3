//! Pull-based snapshot fetching: initial backfill, defensive polling and
//! on-demand refresh.

use super::StreamTransport;
use crate::error::{AppError, Result};
use crate::services::normalizer::{self, RawBatch};
use futures_util::future::BoxFuture;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Serves full and per-roulette snapshots.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the payload for every roulette.
    fn fetch_all(&self, access_token: Option<String>) -> BoxFuture<'static, Result<Value>>;

    /// Fetch the richer payload for one roulette.
    fn fetch_detailed(
        &self,
        key: String,
        access_token: Option<String>,
    ) -> BoxFuture<'static, Result<Value>>;
}

/// REST snapshot source.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: Client,
    snapshot_url: String,
    detailed_url: String,
}

impl HttpSnapshotSource {
    pub fn new(snapshot_url: impl Into<String>, detailed_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("spinfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            snapshot_url: snapshot_url.into(),
            detailed_url: detailed_url.into(),
        }
    }

    async fn get_json(client: Client, url: String, access_token: Option<String>) -> Result<Value> {
        let mut request = client.get(&url).header("Accept", "application/json");
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(200).collect();
            warn!("Snapshot endpoint returned {}: {}", status, excerpt);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(AppError::NotFound(url));
            }
            return Err(AppError::Fetch(format!("HTTP {}", status)));
        }

        Ok(response.json().await?)
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch_all(&self, access_token: Option<String>) -> BoxFuture<'static, Result<Value>> {
        Box::pin(Self::get_json(
            self.client.clone(),
            self.snapshot_url.clone(),
            access_token,
        ))
    }

    fn fetch_detailed(
        &self,
        key: String,
        access_token: Option<String>,
    ) -> BoxFuture<'static, Result<Value>> {
        let client = self.client.clone();
        let url = detailed_url(&self.detailed_url, &key);
        Box::pin(async move { Self::get_json(client, url?, access_token).await })
    }
}

/// `base` with `key` appended as one percent-encoded path segment.
fn detailed_url(base: &str, key: &str) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| AppError::Fetch(format!("invalid detailed url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Fetch(format!("detailed url {} cannot take a path", base)))?
        .pop_if_empty()
        .push(key);
    Ok(url.into())
}

/// Snapshot fetcher with a timeout and a consecutive-failure counter.
///
/// Every `failure_threshold` consecutive failed polls force the stream
/// transport to reconnect and reset the counter. A stream stopped by its
/// owner stays stopped.
pub struct SnapshotFetcher {
    source: Arc<dyn SnapshotSource>,
    transport: Arc<StreamTransport>,
    timeout: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    access_token: RwLock<Option<String>>,
}

impl SnapshotFetcher {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        transport: Arc<StreamTransport>,
        timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            source,
            transport,
            timeout,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            access_token: RwLock::new(None),
        }
    }

    /// Fetch every roulette's payload.
    pub async fn fetch_all(&self) -> Result<RawBatch> {
        let request = self.source.fetch_all(self.access_token());

        let result = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(body)) => normalizer::extract_batch(body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(batch) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                debug!("Snapshot fetched with {} payloads", batch.payloads.len());
                Ok(batch)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Fetch the detailed payload for one roulette. Failures here do not
    /// count toward the reconnect threshold.
    pub async fn fetch_detailed(&self, key: &str) -> Result<Value> {
        let request = self
            .source
            .fetch_detailed(key.to_string(), self.access_token());

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_failure(&self, error: &AppError) {
        let threshold = self.failure_threshold;
        let crossed = self
            .consecutive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(if n + 1 >= threshold { 0 } else { n + 1 })
            })
            .map(|previous| previous + 1 >= threshold)
            .unwrap_or(false);

        if crossed {
            warn!(
                "Snapshot fetch failed {} times in a row ({}); forcing stream reconnect",
                threshold, error
            );
            self.transport.force_reconnect_if_started();
        } else {
            warn!("Snapshot fetch failed: {}", error);
        }
    }
}
