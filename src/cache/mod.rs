//! # Cache Module
//!
//! In-memory caches shared by the dashboard API, gateway event handlers and
//! the background scheduler.
//!
//! ## Cache Types
//!
//! - **Response cache** ([`ResponseCache`]): serialized JSON bodies keyed by
//!   route and query. Readers pass their own TTL, so the stats and
//!   leaderboard routes can share one physical cache with different
//!   freshness requirements.
//! - **Avatar cache** ([`AvatarCache`]): LRU map from user id to
//!   [`Identity`](crate::identity::Identity), flushed once per local day.
//!
//! ## Configuration
//!
//! ```env
//! CACHE_MAX_SIZE=200          # Response cache entries
//! STATS_CACHE_TTL=60          # Seconds
//! LEADERBOARD_CACHE_TTL=30    # Seconds
//! AVATAR_CACHE_MAX_SIZE=500   # Identities
//! REFRESH_UTC_OFFSET=-5       # Day boundary for the avatar cache
//! ```
//!
//! ## Invalidation
//!
//! Leaderboard and stats responses embed booster badges, so any booster
//! change clears the whole response cache ([`CacheService::apply_booster_change`]).
//! There is no key-to-user dependency tracking.

pub mod avatar_cache;
pub mod response_cache;

pub use avatar_cache::{AvatarCache, BoosterUpdate};
pub use response_cache::{CacheMetricsSnapshot, ResponseCache};

use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{clock::Clock, config::Config, identity::Identity};

/// Both caches plus the TTLs route handlers read with.
///
/// Constructed once in `main` and shared by `Arc`.
pub struct CacheService {
    pub responses: ResponseCache,
    pub avatars: AvatarCache,
    stats_ttl: Duration,
    leaderboard_ttl: Duration,
}

impl CacheService {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let stats_ttl = config.stats_ttl();
        let leaderboard_ttl = config.leaderboard_ttl();
        Self {
            responses: ResponseCache::new(config.cache_max_size, &[stats_ttl, leaderboard_ttl]),
            avatars: AvatarCache::new(config.avatar_cache_max_size, clock, config.refresh_offset()),
            stats_ttl,
            leaderboard_ttl,
        }
    }

    pub fn stats_ttl(&self) -> Duration {
        self.stats_ttl
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        self.leaderboard_ttl
    }

    /// Records a booster change pushed by a gateway event.
    ///
    /// Returns `true` when the cached identity changed, in which case every
    /// cached response has been dropped as well.
    pub fn apply_booster_change(&self, user_id: u64, is_booster: bool) -> bool {
        match self.avatars.set_booster(user_id, is_booster) {
            BoosterUpdate::Updated => {
                self.responses.clear();
                info!(
                    "💎 Booster status changed for {} (booster: {}), response cache cleared",
                    user_id, is_booster
                );
                true
            }
            BoosterUpdate::Unchanged | BoosterUpdate::NotCached => false,
        }
    }

    /// Replaces a cached identity after a pull refresh if its booster flag moved.
    pub fn reconcile_identity(&self, user_id: u64, fresh: Identity) -> bool {
        self.avatars.reconcile(user_id, fresh) == BoosterUpdate::Updated
    }

    /// Forgets a user that left the guild.
    pub fn forget_member(&self, user_id: u64) {
        self.avatars.remove(user_id);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            responses: self.responses.len(),
            response_capacity: self.responses.capacity(),
            avatars: self.avatars.len(),
            avatar_capacity: self.avatars.capacity(),
            metrics: self.responses.metrics(),
        }
    }
}

/// Cache occupancy reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub responses: usize,
    pub response_capacity: usize,
    pub avatars: usize,
    pub avatar_capacity: usize,
    pub metrics: CacheMetricsSnapshot,
}
