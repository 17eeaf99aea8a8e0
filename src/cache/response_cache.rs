use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Cached response body with its insertion time.
///
/// The TTL is not stored: each reader decides how fresh it needs the entry to be.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}

/// TTL cache for serialized API responses.
///
/// Keys are chosen by route handlers and usually encode query parameters
/// (`leaderboard:period=week:limit=50`). Capacity is enforced on insert by
/// evicting the single oldest entry, and stale entries are left in place until
/// [`ResponseCache::sweep`] runs.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_size: usize,
    sweep_age: Duration,
    metrics: CacheMetrics,
}

impl ResponseCache {
    /// `ttls` lists every TTL callers read with; the sweep removes entries
    /// older than twice the largest of them.
    pub fn new(max_size: usize, ttls: &[Duration]) -> Self {
        let max_ttl = ttls.iter().copied().max().unwrap_or(Duration::from_secs(60));
        Self {
            entries: Mutex::new(HashMap::with_capacity(max_size.min(1024))),
            max_size: max_size.max(1),
            sweep_age: max_ttl * 2,
            metrics: CacheMetrics::default(),
        }
    }

    /// Returns the value for `key` if it is younger than `ttl`.
    ///
    /// A missing key and an expired one look the same to the caller.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let now = Instant::now();
        let entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.age(now) < ttl => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or overwrites `key`, stamping the current time.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut entries = self.entries.lock();
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );

        // Linear scan for the oldest; the cache holds a few hundred entries at most.
        while entries.len() > self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    entries.remove(&key);
                    self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drops every cached response.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        if removed > 0 {
            debug!("🗑️ Response cache cleared ({} entries)", removed);
        }
    }

    /// Removes entries older than twice the largest configured TTL and
    /// returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) <= self.sweep_age);
        let removed = before - entries.len();
        self.metrics
            .expired_removals
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

impl CacheMetrics {
    fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_removals: self.expired_removals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time response cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
