//! REST implementation of the remote draft store.
//!
//! Every request goes through the deduplicator first and, for requests that
//! actually reach the network, through the two-scope rate-limit gate.

use super::{DraftPatch, NewDraft, RemoteDraftStore};
use crate::dedup::{request_key, DedupConfig, Deduplicator, RequestBody};
use crate::error::{SyncError, SyncResult};
use crate::rate_limit::{RateLimitGate, RateLimitGateConfig};
use async_trait::async_trait;
use draftsync_types::{Draft, DraftId, DraftKey};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bounded retry for ad-hoc reads (`get`, `list`).
///
/// Writes are never retried here; the outbox owns their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Longest wait between attempts. A server asking for more gives up.
    pub max_delay_ms: u64,
}

impl Default for ReadRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        }
    }
}

impl ReadRetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// HTTP draft store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStoreConfig {
    /// Base URL of the draft API (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
    #[serde(default)]
    pub rate_limits: RateLimitGateConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub read_retry: ReadRetryPolicy,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30_000,
            rate_limits: RateLimitGateConfig::default(),
            dedup: DedupConfig::default(),
            read_retry: ReadRetryPolicy::default(),
        }
    }
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DraftList {
    drafts: Vec<Draft>,
}

/// Remote draft store over the REST contract.
pub struct HttpDraftStore {
    config: HttpStoreConfig,
    client: Client,
    gate: Arc<RateLimitGate>,
    dedup: Deduplicator<Option<Value>>,
}

impl HttpDraftStore {
    pub fn new(config: HttpStoreConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            gate: Arc::new(RateLimitGate::new(config.rate_limits.clone())),
            dedup: Deduplicator::new(config.dedup),
            client,
            config,
        })
    }

    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    pub fn rate_limits(&self) -> &RateLimitGate {
        &self.gate
    }

    /// Requests currently tracked by the deduplicator.
    pub fn in_flight(&self) -> usize {
        self.dedup.in_flight()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SyncResult<Option<Value>> {
        let fingerprint = body.as_ref().map_or(RequestBody::Empty, RequestBody::Json);
        let key = request_key(method.as_str(), path, fingerprint);
        let client = self.client.clone();
        let gate = Arc::clone(&self.gate);
        let url = self.url(path);
        let path = path.to_string();

        self.dedup
            .deduplicate(&key, move || async move {
                gate.check(method.as_str(), &path)?;

                let mut request = client.request(method.clone(), &url);
                if let Some(body) = &body {
                    request = request.json(body);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| SyncError::Network(format!("{method} {path} failed: {e}")))?;
                read_response(response).await
            })
            .await
    }

    async fn send_for_draft(&self, method: Method, path: &str, body: Value) -> SyncResult<Draft> {
        let value = self
            .send(method, path, Some(body))
            .await?
            .ok_or_else(|| SyncError::Serialization("empty response body".to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn read(&self, path: &str) -> SyncResult<Value> {
        let policy = self.config.read_retry;
        let mut attempt = 0;
        loop {
            match self.send(Method::GET, path, None).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    return Err(SyncError::Serialization("empty response body".to_string()));
                }
                Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                    let delay = match e.retry_after() {
                        Some(requested) if requested > policy.max_delay() => return Err(e),
                        Some(requested) => requested,
                        None => policy.delay(attempt),
                    };
                    debug!(%path, attempt, ?delay, "Retrying read: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_response(response: Response) -> SyncResult<Option<Value>> {
    let status = response.status();
    if status.is_success() {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(format!("failed to read response: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(serde_json::from_slice(&bytes)?));
    }

    let retry_after = parse_retry_after(response.headers());
    let message = response.text().await.unwrap_or_default();
    match SyncError::from_status(status.as_u16(), message) {
        SyncError::RateLimited { .. } => Err(SyncError::RateLimited { retry_after }),
        other => Err(other),
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn draft_path(id: &DraftId) -> String {
    format!("/drafts/{}", urlencoding::encode(id.as_str()))
}

#[async_trait]
impl RemoteDraftStore for HttpDraftStore {
    async fn create(&self, draft: NewDraft) -> SyncResult<Draft> {
        let body = serde_json::to_value(&draft)?;
        let created = self.send_for_draft(Method::POST, "/drafts", body).await?;
        info!(id = %created.id, key = %created.key, "Created remote draft");
        Ok(created)
    }

    async fn update(&self, id: &DraftId, patch: DraftPatch) -> SyncResult<Draft> {
        let body = serde_json::to_value(&patch)?;
        let updated = self.send_for_draft(Method::PATCH, &draft_path(id), body).await?;
        debug!(%id, "Updated remote draft");
        Ok(updated)
    }

    async fn get(&self, id: &DraftId) -> SyncResult<Draft> {
        let value = self.read(&draft_path(id)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list(&self, key: &DraftKey) -> SyncResult<Vec<Draft>> {
        let path = format!("/drafts?key={}", urlencoding::encode(key.as_str()));
        let list: DraftList = serde_json::from_value(self.read(&path).await?)?;
        debug!(%key, count = list.drafts.len(), "Listed remote drafts");
        Ok(list.drafts)
    }

    async fn delete(&self, id: &DraftId) -> SyncResult<()> {
        match self.send(Method::DELETE, &draft_path(id), None).await {
            Ok(_) => {
                info!(%id, "Deleted remote draft");
                Ok(())
            }
            Err(SyncError::Client { status: 404, .. }) => {
                debug!(%id, "Remote draft already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
