use lru::LruCache;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::RateDecision;
use crate::config::Config;

const BURST_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ApiRateLimiterConfig {
    /// Requests allowed per window.
    pub quota: u32,
    pub window: Duration,
    /// Requests allowed within any one-second burst window.
    pub burst: u32,
    pub max_tracked: usize,
}

impl From<&Config> for ApiRateLimiterConfig {
    fn from(config: &Config) -> Self {
        Self {
            quota: config.rate_limit_requests,
            window: config.rate_window(),
            burst: config.rate_limit_burst,
            max_tracked: config.rate_limit_max_tracked,
        }
    }
}

#[derive(Debug, Clone)]
struct ClientWindow {
    window_start: Instant,
    count: u32,
    burst_start: Instant,
    burst_count: u32,
    last_seen: Instant,
}

impl ClientWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            burst_start: now,
            burst_count: 0,
            last_seen: now,
        }
    }
}

/// Fixed-window limiter keyed by client IP.
///
/// Windows start at a client's first request and are reset lazily on the
/// first check at or after their end. Tracked clients are kept in LRU order
/// so the least recently seen ones go first when the cap is exceeded.
pub struct ApiRateLimiter {
    clients: Mutex<LruCache<String, ClientWindow>>,
    config: ApiRateLimiterConfig,
}

impl ApiRateLimiter {
    pub fn new(config: ApiRateLimiterConfig) -> Self {
        Self {
            clients: Mutex::new(LruCache::unbounded()),
            config,
        }
    }

    pub fn quota(&self) -> u32 {
        self.config.quota
    }

    pub fn check(&self, client_ip: &str) -> RateDecision {
        self.check_at(client_ip, Instant::now())
    }

    pub fn check_at(&self, client_ip: &str, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock();

        if !clients.contains(client_ip) {
            clients.put(client_ip.to_string(), ClientWindow::new(now));
            self.evict_overflow(&mut clients);
        }

        let Some(client) = clients.get_mut(client_ip) else {
            // Only reachable with a cap of zero tracked clients.
            return RateDecision::Allowed {
                remaining: self.config.quota,
            };
        };
        client.last_seen = now;

        let window_end = client.window_start + self.config.window;
        if now >= window_end {
            client.window_start = now;
            client.count = 0;
        }

        if client.count >= self.config.quota {
            let retry_after = (client.window_start + self.config.window)
                .saturating_duration_since(now)
                .min(self.config.window);
            return RateDecision::Limited { retry_after };
        }

        if now >= client.burst_start + BURST_WINDOW {
            client.burst_start = now;
            client.burst_count = 0;
        }

        if client.burst_count >= self.config.burst {
            let retry_after = (client.burst_start + BURST_WINDOW).saturating_duration_since(now);
            return RateDecision::Limited { retry_after };
        }

        client.count += 1;
        client.burst_count += 1;

        RateDecision::Allowed {
            remaining: self.config.quota - client.count,
        }
    }

    /// Drops clients idle for longer than two windows. Returns how many.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let idle_limit = self.config.window * 2;
        let mut clients = self.clients.lock();

        let stale: Vec<String> = clients
            .iter()
            .filter(|(_, client)| now.saturating_duration_since(client.last_seen) > idle_limit)
            .map(|(ip, _)| ip.clone())
            .collect();

        for ip in &stale {
            clients.pop(ip);
        }

        if !stale.is_empty() {
            debug!(
                "🧹 Rate limiter cleanup: removed {}, tracking {}",
                stale.len(),
                clients.len()
            );
        }

        stale.len()
    }

    pub fn tracked(&self) -> usize {
        self.clients.lock().len()
    }

    fn evict_overflow(&self, clients: &mut LruCache<String, ClientWindow>) {
        if clients.len() <= self.config.max_tracked {
            return;
        }

        // Trim to 90% of the cap so eviction does not run on every new client.
        let target = self.config.max_tracked * 9 / 10;
        let mut removed = 0;
        while clients.len() > target.max(1) {
            if clients.pop_lru().is_none() {
                break;
            }
            removed += 1;
        }
        debug!("🧹 Rate limiter evicted {} idle clients", removed);
    }
}
