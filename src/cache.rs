// Key-value cache interface + in-memory implementation.
// Injected into every component; no process-wide singletons.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL-aware key-value store for snapshots, time buckets, and real-time
/// counters. `compare_and_swap` is the primitive the versioned
/// previous-counter slot relies on.
pub trait MetricsCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Replace `key` only if its current value equals `expected`
    /// (`None` = key must be vacant or expired). Returns whether the swap
    /// happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        value: Value,
        ttl: Option<Duration>,
    ) -> bool;

    /// Atomically add `by` to a numeric key (missing or expired counts as
    /// zero) and return the new value. The TTL is set on first touch only,
    /// so an hourly counter keeps its original expiry across increments.
    fn increment(&self, key: &str, by: f64, ttl: Option<Duration>) -> f64;

    fn remove(&self, key: &str);
}

/// Typed read: deserialize a cached JSON value, treating decode failures as
/// a miss (stale shape after an upgrade).
pub fn get_json<T: DeserializeOwned>(cache: &dyn MetricsCache, key: &str) -> Option<T> {
    let value = cache.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(key, error = %e, "cache entry has stale shape, treating as miss");
            None
        }
    }
}

/// Typed write; serialization failure is logged and dropped (cache writes
/// are best-effort).
pub fn put_json<T: Serialize>(cache: &dyn MetricsCache, key: &str, value: &T, ttl: Option<Duration>) {
    match serde_json::to_value(value) {
        Ok(v) => cache.put(key, v, ttl),
        Err(e) => tracing::warn!(key, error = %e, "cache serialize failed"),
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// In-process cache with per-entry expiry. Lock scope is a single map
/// operation, so `increment` and `compare_and_swap` are atomic with respect
/// to each other.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Called periodically by the scrape worker so
    /// dead minute buckets do not accumulate.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| !e.expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(e) if e.expired(now) => {
                entries.remove(key);
                None
            }
            Some(e) => Some(e.value.clone()),
            None => None,
        }
    }

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), entry);
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        value: Value,
        ttl: Option<Duration>,
    ) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let current = entries.get(key).filter(|e| !e.expired(now)).map(|e| &e.value);
        if current != expected {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| now + d),
            },
        );
        true
    }

    fn increment(&self, key: &str, by: f64, ttl: Option<Duration>) -> f64 {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let (current, expires_at) = match entries.get(key) {
            Some(e) if !e.expired(now) => (e.value.as_f64().unwrap_or(0.0), e.expires_at),
            _ => (0.0, ttl.map(|d| now + d)),
        };
        let next = current + by;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(next),
                expires_at,
            },
        );
        next
    }

    fn remove(&self, key: &str) {
        self.entries.lock().expect("cache lock poisoned").remove(key);
    }
}
