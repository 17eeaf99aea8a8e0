//! Discord identity lookups for dashboard enrichment.
//!
//! Leaderboard and profile responses show each user's avatar, display name
//! and booster badge. [`IdentityResolver`] serves those from the
//! [`AvatarCache`](crate::cache::AvatarCache) and falls back to an
//! [`IdentitySource`] (the guild member API in production) with a hard
//! timeout.

pub mod discord;

pub use discord::GuildMemberSource;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    cache::CacheService,
    error::{BotError, Result},
};

/// Snapshot of a member's public identity at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub avatar_url: Option<String>,
    pub display_name: String,
    pub username: Option<String>,
    /// Unix seconds.
    pub joined_at: Option<i64>,
    pub is_booster: bool,
}

impl Identity {
    /// Stand-in for users that could not be looked up. Never cached.
    pub fn placeholder(user_id: u64) -> Self {
        Self {
            avatar_url: None,
            display_name: user_id.to_string(),
            username: None,
            joined_at: None,
            is_booster: false,
        }
    }
}

/// Result of asking the identity source about one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLookup {
    Found(Identity),
    /// The user is definitely not in the guild.
    NotFound,
}

/// Authoritative source of member identities.
///
/// Transient failures are `Err`; a user that is known to be absent is
/// `Ok(MemberLookup::NotFound)` so callers can evict instead of retrying.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn fetch_member(&self, user_id: u64) -> Result<MemberLookup>;
}

/// Calls `source` with a deadline; an elapsed deadline becomes
/// [`BotError::Timeout`].
pub async fn fetch_with_timeout(
    source: &dyn IdentitySource,
    user_id: u64,
    timeout: Duration,
) -> Result<MemberLookup> {
    match tokio::time::timeout(timeout, source.fetch_member(user_id)).await {
        Ok(result) => result,
        Err(_) => Err(BotError::Timeout {
            operation: "fetch_member",
            after: timeout,
        }),
    }
}

/// Upper bound on concurrent member lookups when enriching a leaderboard page.
pub const MAX_CONCURRENT_FETCHES: usize = 10;

/// Cache-through identity lookup used by route handlers.
#[derive(Clone)]
pub struct IdentityResolver {
    source: Arc<dyn IdentitySource>,
    cache: Arc<CacheService>,
    timeout: Duration,
}

impl IdentityResolver {
    pub fn new(source: Arc<dyn IdentitySource>, cache: Arc<CacheService>, timeout: Duration) -> Self {
        Self {
            source,
            cache,
            timeout,
        }
    }

    /// Returns the cached identity, fetching and caching it on a miss.
    ///
    /// Never fails: unknown users and upstream errors yield
    /// [`Identity::placeholder`].
    pub async fn resolve(&self, user_id: u64) -> Identity {
        if let Some(identity) = self.cache.avatars.get(user_id) {
            return identity;
        }

        match fetch_with_timeout(self.source.as_ref(), user_id, self.timeout).await {
            Ok(MemberLookup::Found(identity)) => {
                self.cache.avatars.set(user_id, identity.clone());
                identity
            }
            Ok(MemberLookup::NotFound) => {
                debug!("👤 User {} not in guild, using placeholder", user_id);
                Identity::placeholder(user_id)
            }
            Err(e) => {
                warn!("⚠️ Identity fetch failed for {}: {}", user_id, e);
                Identity::placeholder(user_id)
            }
        }
    }

    /// Resolves many users with at most `max_concurrent` lookups in flight.
    pub async fn resolve_many(&self, user_ids: &[u64], max_concurrent: usize) -> HashMap<u64, Identity> {
        stream::iter(user_ids.iter().copied())
            .map(|user_id| async move { (user_id, self.resolve(user_id).await) })
            .buffer_unordered(max_concurrent.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::Config};
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn cache() -> Arc<CacheService> {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap());
        Arc::new(CacheService::new(&Config::default(), Arc::new(clock)))
    }

    fn member(name: &str) -> Identity {
        Identity {
            avatar_url: Some("https://cdn.example/a.png".into()),
            display_name: name.into(),
            username: Some(name.to_lowercase()),
            joined_at: Some(1_650_000_000),
            is_booster: true,
        }
    }

    #[tokio::test]
    async fn miss_fetches_once_then_hits_cache() {
        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .with(eq(5))
            .times(1)
            .returning(|_| Ok(MemberLookup::Found(member("Layla"))));

        let resolver = IdentityResolver::new(Arc::new(source), cache(), Duration::from_secs(2));

        assert_eq!(resolver.resolve(5).await, member("Layla"));
        assert_eq!(resolver.resolve(5).await, member("Layla"));
    }

    #[tokio::test]
    async fn not_found_returns_uncached_placeholder() {
        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .times(2)
            .returning(|_| Ok(MemberLookup::NotFound));

        let cache = cache();
        let resolver = IdentityResolver::new(Arc::new(source), cache.clone(), Duration::from_secs(2));

        assert_eq!(resolver.resolve(77).await, Identity::placeholder(77));
        assert_eq!(resolver.resolve(77).await.display_name, "77");
        assert!(cache.avatars.is_empty());
    }

    #[tokio::test]
    async fn upstream_error_degrades_to_placeholder() {
        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .returning(|_| Err(BotError::Store("gateway closed".into())));

        let resolver = IdentityResolver::new(Arc::new(source), cache(), Duration::from_secs(2));
        assert_eq!(resolver.resolve(3).await, Identity::placeholder(3));
    }

    struct SlowSource;

    #[async_trait]
    impl IdentitySource for SlowSource {
        async fn fetch_member(&self, _user_id: u64) -> Result<MemberLookup> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(MemberLookup::NotFound)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let err = fetch_with_timeout(&SlowSource, 1, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Timeout { .. }));
    }

    #[tokio::test]
    async fn resolve_many_covers_every_id() {
        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .times(3)
            .returning(|id| Ok(MemberLookup::Found(member(&format!("U{id}")))));

        let resolver = IdentityResolver::new(Arc::new(source), cache(), Duration::from_secs(2));
        let resolved = resolver.resolve_many(&[1, 2, 3], 2).await;

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[&2].display_name, "U2");
    }
}
