use async_trait::async_trait;
use chrono::{Days, FixedOffset};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    cache::CacheService,
    clock::Clock,
    error::{BotError, Result},
    identity::{fetch_with_timeout, IdentitySource, MemberLookup},
    ratelimit::ApiRateLimiter,
    storage::SnapshotStore,
};

/// Body of one background loop.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Drops expired responses and idle rate-limit clients.
pub struct CacheSweep {
    cache: Arc<CacheService>,
    limiter: Arc<ApiRateLimiter>,
}

impl CacheSweep {
    pub fn new(cache: Arc<CacheService>, limiter: Arc<ApiRateLimiter>) -> Self {
        Self { cache, limiter }
    }
}

#[async_trait]
impl ScheduledTask for CacheSweep {
    fn name(&self) -> &'static str {
        "cache_sweep"
    }

    async fn run(&self) -> Result<()> {
        let expired = self.cache.responses.sweep();
        let idle = self.limiter.cleanup();
        if expired > 0 || idle > 0 {
            debug!("🧹 Sweep: {} expired responses, {} idle clients", expired, idle);
        }
        Ok(())
    }
}

/// Pacing for the booster refresh so the member API is not hammered.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    /// Pause after each lookup.
    pub stagger: Duration,
    /// Longer pause after every `batch_size` lookups.
    pub batch_pause: Duration,
    pub batch_size: usize,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(10),
            batch_pause: Duration::from_millis(500),
            batch_size: 50,
        }
    }
}

impl Throttle {
    fn pause_after(&self, checked: usize) -> Duration {
        if self.batch_size > 0 && checked % self.batch_size == 0 {
            self.batch_pause
        } else {
            self.stagger
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub updated: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Re-reads the booster flag of every cached identity.
pub struct BoosterRefresh {
    cache: Arc<CacheService>,
    source: Arc<dyn IdentitySource>,
    timeout: Duration,
    throttle: Throttle,
}

impl BoosterRefresh {
    pub fn new(
        cache: Arc<CacheService>,
        source: Arc<dyn IdentitySource>,
        timeout: Duration,
        throttle: Throttle,
    ) -> Self {
        Self {
            cache,
            source,
            timeout,
            throttle,
        }
    }

    /// Checks every cached user once.
    ///
    /// Users the guild no longer knows are evicted. Changed identities are
    /// replaced and, if any changed, the response cache is cleared once at
    /// the end. Fails only when every single lookup failed.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        // Snapshot the keys so no lock is held across lookups.
        let user_ids = self.cache.avatars.list_keys();
        let mut report = RefreshReport::default();
        if user_ids.is_empty() {
            return Ok(report);
        }

        info!("🔄 Booster refresh started: {} users to check", user_ids.len());

        let mut last_error = None;
        for user_id in user_ids {
            match fetch_with_timeout(self.source.as_ref(), user_id, self.timeout).await {
                Ok(MemberLookup::Found(identity)) => {
                    if self.cache.reconcile_identity(user_id, identity) {
                        report.updated += 1;
                    }
                }
                Ok(MemberLookup::NotFound) => {
                    self.cache.forget_member(user_id);
                    report.removed += 1;
                }
                Err(e) => {
                    debug!("Booster lookup failed for {}: {}", user_id, e);
                    report.errors += 1;
                    last_error = Some(e);
                }
            }
            report.checked += 1;

            tokio::time::sleep(self.throttle.pause_after(report.checked)).await;
        }

        if report.updated > 0 {
            self.cache.responses.clear();
        }

        info!(
            "✅ Booster refresh complete: checked {}, updated {}, removed {}, errors {}",
            report.checked, report.updated, report.removed, report.errors
        );

        match last_error {
            Some(e) if report.errors == report.checked => Err(e),
            _ => Ok(report),
        }
    }
}

#[async_trait]
impl ScheduledTask for BoosterRefresh {
    fn name(&self) -> &'static str {
        "booster_refresh"
    }

    async fn run(&self) -> Result<()> {
        self.refresh().await.map(|_| ())
    }
}

/// Writes today's snapshot and enforces retention.
pub struct DailySnapshot {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    guild_id: u64,
    offset: FixedOffset,
    retention_days: u32,
}

impl DailySnapshot {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        guild_id: u64,
        offset: FixedOffset,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            clock,
            guild_id,
            offset,
            retention_days,
        }
    }

    /// Makes sure yesterday has a snapshot so "since yesterday" deltas work
    /// on the first day after deployment. Returns the rows written.
    pub async fn bootstrap(&self) -> Result<usize> {
        let today = self.clock.today(self.offset);
        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| BotError::Store(format!("no day before {}", today)))?;

        if self.store.has_snapshot(self.guild_id, yesterday).await? {
            info!("📸 Snapshots found for {}, period leaderboards ready", yesterday);
            return Ok(0);
        }

        info!("🔧 No snapshot for {}, creating initial snapshot", yesterday);
        let written = self.store.create_snapshot(self.guild_id, yesterday).await?;
        info!("✅ Snapshot bootstrap complete: {} users ({})", written, yesterday);
        Ok(written)
    }
}

#[async_trait]
impl ScheduledTask for DailySnapshot {
    fn name(&self) -> &'static str {
        "daily_snapshot"
    }

    async fn run(&self) -> Result<()> {
        let today = self.clock.today(self.offset);
        let written = self.store.create_snapshot(self.guild_id, today).await?;

        let deleted = match today.checked_sub_days(Days::new(u64::from(self.retention_days))) {
            Some(cutoff) => self.store.delete_before(self.guild_id, cutoff).await?,
            None => {
                warn!("⚠️ Snapshot retention cutoff out of range, skipping cleanup");
                0
            }
        };

        info!(
            "✅ Daily snapshot {} complete: {} users, {} old rows deleted",
            today, written, deleted
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{offset_from_hours, ManualClock},
        config::Config,
        identity::{Identity, MockIdentitySource},
        ratelimit::ApiRateLimiterConfig,
        storage::{Activity, JsonSnapshotStore},
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 5).unwrap())
    }

    fn identity(is_booster: bool) -> Identity {
        Identity {
            avatar_url: None,
            display_name: "Sami".into(),
            username: Some("sami".into()),
            joined_at: None,
            is_booster,
        }
    }

    fn cache() -> Arc<CacheService> {
        cache_with(&clock())
    }

    fn cache_with(clock: &ManualClock) -> Arc<CacheService> {
        Arc::new(CacheService::new(&Config::default(), Arc::new(clock.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_updates_changed_and_drops_departed_users() {
        let cache = cache();
        cache.avatars.set(1, identity(false));
        cache.avatars.set(2, identity(true));
        cache.avatars.set(3, identity(false));
        cache.responses.set("leaderboard", json!([]));

        let mut source = MockIdentitySource::new();
        source.expect_fetch_member().returning(|id| match id {
            1 | 2 => Ok(MemberLookup::Found(identity(true))),
            _ => Ok(MemberLookup::NotFound),
        });

        let task = BoosterRefresh::new(
            cache.clone(),
            Arc::new(source),
            Duration::from_secs(2),
            Throttle::default(),
        );
        let report = task.refresh().await.unwrap();

        assert_eq!(
            report,
            RefreshReport {
                checked: 3,
                updated: 1,
                removed: 1,
                errors: 0
            }
        );
        assert!(cache.avatars.get(1).unwrap().is_booster);
        assert!(cache.avatars.get(3).is_none());
        assert!(cache.responses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_at_local_midnight_sees_previous_day_users() {
        // 23:59 at UTC-5.
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 11, 4, 59, 0).unwrap());
        let cache = cache_with(&clock);
        cache.avatars.set(1, identity(false));
        cache.responses.set("leaderboard", json!([]));

        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .returning(|_| Ok(MemberLookup::Found(identity(true))));

        clock.advance(chrono::Duration::seconds(61));
        let task = BoosterRefresh::new(cache.clone(), Arc::new(source), Duration::from_secs(2), Throttle::default());
        let report = task.refresh().await.unwrap();

        assert_eq!(
            report,
            RefreshReport {
                checked: 1,
                updated: 1,
                removed: 0,
                errors: 0
            }
        );
        assert!(cache.responses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_refresh_keeps_responses() {
        let cache = cache();
        cache.avatars.set(1, identity(true));
        cache.responses.set("stats", json!({}));

        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .returning(|_| Ok(MemberLookup::Found(identity(true))));

        let task = BoosterRefresh::new(cache.clone(), Arc::new(source), Duration::from_secs(2), Throttle::default());
        task.refresh().await.unwrap();
        assert_eq!(cache.responses.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_fails_only_when_every_lookup_fails() {
        let cache = cache();
        cache.avatars.set(1, identity(false));
        cache.avatars.set(2, identity(false));

        let mut source = MockIdentitySource::new();
        source
            .expect_fetch_member()
            .returning(|_| Err(BotError::Store("down".into())));

        let task = BoosterRefresh::new(cache.clone(), Arc::new(source), Duration::from_secs(2), Throttle::default());
        assert!(task.refresh().await.is_err());
        // Entries are left as they were.
        assert_eq!(cache.avatars.len(), 2);
    }

    #[test]
    fn throttle_pauses_longer_every_batch() {
        let throttle = Throttle::default();
        assert_eq!(throttle.pause_after(1), Duration::from_millis(10));
        assert_eq!(throttle.pause_after(50), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn snapshot_bootstrap_then_daily_run() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonSnapshotStore::new(dir.path()).await.unwrap());
        store
            .record_activity(7, 1, Activity { xp: 40, messages: 2, voice_minutes: 0 })
            .await
            .unwrap();

        let clock = clock();
        let task = DailySnapshot::new(store.clone(), Arc::new(clock.clone()), 7, offset_from_hours(0).unwrap(), 35);

        assert_eq!(task.bootstrap().await.unwrap(), 1);
        assert_eq!(task.bootstrap().await.unwrap(), 0);

        let june = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        assert!(store.has_snapshot(7, june(9)).await.unwrap());

        task.run().await.unwrap();
        assert!(store.has_snapshot(7, june(10)).await.unwrap());

        // 35 days later the bootstrap row falls out of retention.
        clock.advance(chrono::Duration::days(35));
        task.run().await.unwrap();
        assert!(!store.has_snapshot(7, june(9)).await.unwrap());
        assert!(store.has_snapshot(7, june(10)).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_runs_without_error() {
        let cache = cache();
        let limiter = Arc::new(ApiRateLimiter::new(ApiRateLimiterConfig::from(&Config::default())));
        limiter.check("1.1.1.1");
        let task = CacheSweep::new(cache, limiter.clone());
        task.run().await.unwrap();
        assert_eq!(limiter.tracked(), 1);
    }
}
