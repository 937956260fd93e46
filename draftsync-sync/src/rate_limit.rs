//! Client-side sliding-window rate limiting.
//!
//! Every scope keeps the instants of its recent calls. A check first drops
//! instants older than the window, then allows the call when fewer than
//! `max_requests` remain. Two scopes guard each request: the global scope
//! and an endpoint scope derived from the method and path. Either can
//! reject.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Scope shared by every outbound call.
pub const GLOBAL_SCOPE: &str = "global";

/// Limits for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per window.
    pub max_requests: usize,
    /// Window length (ms).
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: usize) -> Self {
        Self {
            max_requests,
            window_ms: 60_000,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Sliding-window limiter over any number of named scopes.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn with_window<R>(
        &self,
        scope: &str,
        f: impl FnOnce(&mut VecDeque<Instant>, Instant) -> R,
    ) -> R {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows.entry(scope.to_string()).or_default();
        let now = Instant::now();
        let length = self.config.window();
        while window
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= length)
        {
            window.pop_front();
        }
        f(window, now)
    }

    /// Checks the scope and, when allowed, records the call.
    pub fn is_allowed(&self, scope: &str) -> bool {
        let max = self.config.max_requests;
        self.with_window(scope, |window, now| {
            if window.len() < max {
                window.push_back(now);
                true
            } else {
                false
            }
        })
    }

    /// Checks the scope without recording anything.
    pub fn would_allow(&self, scope: &str) -> bool {
        let max = self.config.max_requests;
        self.with_window(scope, |window, _| window.len() < max)
    }

    /// Records a call unconditionally.
    pub fn record(&self, scope: &str) {
        self.with_window(scope, |window, now| window.push_back(now));
    }

    /// Time until the oldest call in the window expires.
    /// Zero when the window is empty. Never exceeds the window length.
    pub fn retry_after(&self, scope: &str) -> Duration {
        let length = self.config.window();
        self.with_window(scope, |window, now| match window.front() {
            Some(oldest) => length.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        })
    }

    /// Calls still available in the current window.
    pub fn remaining(&self, scope: &str) -> usize {
        let max = self.config.max_requests;
        self.with_window(scope, |window, _| max.saturating_sub(window.len()))
    }

    /// Forgets all recorded calls for a scope.
    pub fn reset(&self, scope: &str) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.remove(scope);
        }
    }
}

/// Collapses a request path into its endpoint template.
///
/// The query string is dropped and every segment after the first is treated
/// as an identifier: `PATCH /drafts/abc` becomes `PATCH /drafts/:id`.
pub fn endpoint_scope(method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let mut template = String::new();
    for (i, segment) in path.split('/').filter(|s| !s.is_empty()).enumerate() {
        template.push('/');
        template.push_str(if i == 0 { segment } else { ":id" });
    }
    if template.is_empty() {
        template.push('/');
    }
    format!("{} {}", method.to_ascii_uppercase(), template)
}

/// Configuration for the two-scope gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitGateConfig {
    /// Limit across all endpoints.
    pub global: RateLimitConfig,
    /// Tighter limits for specific endpoints, keyed by `endpoint_scope`.
    #[serde(default)]
    pub endpoints: HashMap<String, RateLimitConfig>,
}

impl Default for RateLimitGateConfig {
    fn default() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert("POST /drafts".to_string(), RateLimitConfig::per_minute(30));
        Self {
            global: RateLimitConfig::default(),
            endpoints,
        }
    }
}

/// Applies the global and endpoint limits conjunctively.
pub struct RateLimitGate {
    global: RateLimiter,
    endpoints: HashMap<String, RateLimiter>,
}

impl RateLimitGate {
    pub fn new(config: RateLimitGateConfig) -> Self {
        Self {
            global: RateLimiter::new(config.global),
            endpoints: config
                .endpoints
                .into_iter()
                .map(|(scope, limits)| (scope, RateLimiter::new(limits)))
                .collect(),
        }
    }

    /// Admits the request or returns `RateLimited` with the delay after which
    /// every rejecting scope has room again. A rejected request is recorded
    /// in neither scope.
    pub fn check(&self, method: &str, path: &str) -> SyncResult<()> {
        let scope = endpoint_scope(method, path);
        let endpoint = self.endpoints.get(&scope);

        let global_ok = self.global.would_allow(GLOBAL_SCOPE);
        let endpoint_ok = endpoint.is_none_or(|limiter| limiter.would_allow(&scope));

        if global_ok && endpoint_ok {
            self.global.record(GLOBAL_SCOPE);
            if let Some(limiter) = endpoint {
                limiter.record(&scope);
            }
            return Ok(());
        }

        let mut retry_after = Duration::ZERO;
        if !global_ok {
            retry_after = retry_after.max(self.global.retry_after(GLOBAL_SCOPE));
        }
        if let Some(limiter) = endpoint.filter(|_| !endpoint_ok) {
            retry_after = retry_after.max(limiter.retry_after(&scope));
        }
        debug!(%scope, ?retry_after, "Request rejected by local rate limit");
        Err(SyncError::RateLimited {
            retry_after: Some(retry_after),
        })
    }

    pub fn global(&self) -> &RateLimiter {
        &self.global
    }

    pub fn endpoint(&self, scope: &str) -> Option<&RateLimiter> {
        self.endpoints.get(scope)
    }
}
