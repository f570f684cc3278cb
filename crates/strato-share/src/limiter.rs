//! Fixed-window rate limiting for the public share API.
//!
//! The counting policy lives here; the counter storage is pluggable so a
//! deployment can swap the in-memory store for an external cache without
//! touching limiter behavior.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

/// Counter storage keyed by client identity. The check-and-increment must
/// be atomic per call to avoid over-admission under concurrent redemptions
/// from one IP.
pub trait CounterStore: Send + Sync {
    /// Increment `key`'s counter for the current window if it is below
    /// `limit`. Returns `true` when the request is admitted.
    fn increment_if_below(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool;
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// In-memory counter store with opportunistic eviction of expired windows.
pub struct InMemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

/// Expired windows are swept once the map grows past this many keys.
const EVICTION_THRESHOLD: usize = 1024;

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment_if_below(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let mut windows = self.windows.lock();

        if windows.len() > EVICTION_THRESHOLD {
            windows.retain(|_, w| w.reset_at > now);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Fixed-window limiter: `limit` admissions per `window` per key.
pub struct RateLimiter {
    store: Box<dyn CounterStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Default policy of the public share API: 60 requests per 60 seconds.
    pub fn new() -> Self {
        Self::with_policy(Box::new(InMemoryCounterStore::new()), 60, Duration::seconds(60))
    }

    pub fn with_policy(store: Box<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Admit or reject one request from `key`.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let admitted = self
            .store
            .increment_if_below(key, self.limit, self.window, now);
        if !admitted {
            warn!(key, limit = self.limit, "rate limit exceeded");
        }
        admitted
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
