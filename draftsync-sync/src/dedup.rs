//! In-flight request deduplication.
//!
//! Identical requests issued while an earlier one is still in flight share
//! its future instead of reaching the transport again. Identity is the
//! method, the path and a fingerprint of the body.

use crate::error::SyncResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Deduplication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum age of an in-flight request that may still be joined (ms).
    pub ttl_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_ms: 5_000 }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Body of an outbound request, as seen by the fingerprint.
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Empty,
    Json(&'a Value),
    /// Opaque payloads all share one fingerprint.
    Binary(&'a [u8]),
}

impl RequestBody<'_> {
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Empty => "empty".to_string(),
            Self::Binary(_) => "binary".to_string(),
            Self::Json(value) => {
                let digest = Sha256::digest(value.to_string().as_bytes());
                hex::encode(digest)
            }
        }
    }
}

/// Builds the deduplication key for a request.
pub fn request_key(method: &str, path: &str, body: RequestBody<'_>) -> String {
    format!("{} {} {}", method.to_ascii_uppercase(), path, body.fingerprint())
}

type SharedResponse<T> = Shared<BoxFuture<'static, SyncResult<T>>>;

struct PendingRequest<T> {
    response: SharedResponse<T>,
    issued_at: Instant,
    generation: u64,
}

impl<T: Clone> PendingRequest<T> {
    /// Only unsettled requests are joined. A settled result may describe
    /// server state that a later identical request must change again.
    fn is_joinable(&self, now: Instant, ttl: Duration) -> bool {
        self.response.peek().is_none() && now.duration_since(self.issued_at) < ttl
    }
}

/// Collapses identical concurrent requests into one.
pub struct Deduplicator<T: Clone> {
    ttl: Duration,
    pending: Arc<Mutex<HashMap<String, PendingRequest<T>>>>,
    generation: AtomicU64,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: DedupConfig) -> Self {
        Self {
            ttl: config.ttl(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `issue` unless a request with the same key is still in flight and
    /// younger than the TTL, in which case that request's result is returned.
    ///
    /// Records are evicted one TTL after they settle. A settled record is
    /// never joined, so every later request reaches the transport.
    pub async fn deduplicate<F, Fut>(&self, key: &str, issue: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let response = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            match pending.get(key) {
                Some(request) if request.is_joinable(now, self.ttl) => {
                    trace!(%key, "Joining in-flight request");
                    request.response.clone()
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let response = issue().boxed().shared();
                    pending.insert(
                        key.to_string(),
                        PendingRequest {
                            response: response.clone(),
                            issued_at: now,
                            generation,
                        },
                    );
                    self.schedule_eviction(key.to_string(), generation, response.clone());
                    response
                }
            }
        };
        response.await
    }

    fn schedule_eviction(&self, key: String, generation: u64, response: SharedResponse<T>) {
        let pending = Arc::clone(&self.pending);
        let ttl = self.ttl;
        tokio::spawn(async move {
            let _ = response.await;
            tokio::time::sleep(ttl).await;
            let mut pending = pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending.get(&key).is_some_and(|r| r.generation == generation) {
                pending.remove(&key);
            }
        });
    }

    /// Number of records currently held, settled or not.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}
