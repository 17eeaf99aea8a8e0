use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::{config::Config, storage::Activity};

/// Cooldown entries kept before expired ones are purged.
const XP_COOLDOWN_CACHE_THRESHOLD: usize = 500;
/// Hard cap on cooldown entries; only the newest survive past it.
const XP_COOLDOWN_CACHE_MAX_SIZE: usize = 1000;

/// Turns chat and voice events into [`Activity`] increments.
///
/// Messages always count, but only earn XP once per cooldown. Voice time is
/// credited in whole minutes when the member leaves.
pub struct ActivityTracker {
    xp_range: (u64, u64),
    xp_cooldown: Duration,
    voice_xp_per_min: u64,
    last_xp: DashMap<u64, Instant>,
    voice_sessions: DashMap<u64, Instant>,
}

impl ActivityTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            xp_range: (config.xp_message_min, config.xp_message_max),
            xp_cooldown: config.xp_cooldown(),
            voice_xp_per_min: config.xp_voice_per_min,
            last_xp: DashMap::new(),
            voice_sessions: DashMap::new(),
        }
    }

    pub fn on_message(&self, user_id: u64, now: Instant) -> Activity {
        let earns_xp = match self.last_xp.get(&user_id) {
            Some(last) => now.saturating_duration_since(*last) >= self.xp_cooldown,
            None => true,
        };

        let xp = if earns_xp {
            self.last_xp.insert(user_id, now);
            self.purge_cooldowns(now);
            let (min, max) = self.xp_range;
            fastrand::u64(min..=max)
        } else {
            0
        };

        Activity {
            xp,
            messages: 1,
            voice_minutes: 0,
        }
    }

    pub fn on_voice_join(&self, user_id: u64, now: Instant) {
        self.voice_sessions.entry(user_id).or_insert(now);
    }

    /// Ends a voice session. `None` when no session was open or it lasted
    /// under a minute.
    pub fn on_voice_leave(&self, user_id: u64, now: Instant) -> Option<Activity> {
        let (_, joined) = self.voice_sessions.remove(&user_id)?;
        let minutes = now.saturating_duration_since(joined).as_secs() / 60;
        if minutes == 0 {
            return None;
        }

        Some(Activity {
            xp: minutes * self.voice_xp_per_min,
            messages: 0,
            voice_minutes: minutes,
        })
    }

    pub fn in_voice(&self) -> usize {
        self.voice_sessions.len()
    }

    fn purge_cooldowns(&self, now: Instant) {
        if self.last_xp.len() <= XP_COOLDOWN_CACHE_THRESHOLD {
            return;
        }
        let cooldown = self.xp_cooldown;
        self.last_xp
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);

        if self.last_xp.len() <= XP_COOLDOWN_CACHE_MAX_SIZE {
            return;
        }

        let mut entries: Vec<(u64, Instant)> = self
            .last_xp
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        for (user_id, _) in entries.into_iter().skip(XP_COOLDOWN_CACHE_MAX_SIZE) {
            self.last_xp.remove(&user_id);
        }
        debug!("⚠️ XP cooldown map capped at {} users", XP_COOLDOWN_CACHE_MAX_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracker() -> ActivityTracker {
        ActivityTracker::new(&Config::default())
    }

    #[test]
    fn message_xp_respects_cooldown() {
        let tracker = tracker();
        let t0 = Instant::now();

        let first = tracker.on_message(1, t0);
        assert!((15..=25).contains(&first.xp));
        assert_eq!(first.messages, 1);

        let spam = tracker.on_message(1, t0 + Duration::from_secs(30));
        assert_eq!(spam.xp, 0);
        assert_eq!(spam.messages, 1);

        assert!(tracker.on_message(1, t0 + Duration::from_secs(60)).xp > 0);
    }

    #[test]
    fn voice_minutes_are_whole_minutes() {
        let tracker = tracker();
        let t0 = Instant::now();

        tracker.on_voice_join(9, t0);
        // Re-joining (channel move) keeps the original start.
        tracker.on_voice_join(9, t0 + Duration::from_secs(60));

        let activity = tracker.on_voice_leave(9, t0 + Duration::from_secs(150)).unwrap();
        assert_eq!(activity.voice_minutes, 2);
        assert_eq!(activity.xp, 10);
        assert_eq!(tracker.in_voice(), 0);
    }

    #[test]
    fn short_or_unknown_sessions_earn_nothing() {
        let tracker = tracker();
        let t0 = Instant::now();
        assert!(tracker.on_voice_leave(4, t0).is_none());

        tracker.on_voice_join(4, t0);
        assert!(tracker.on_voice_leave(4, t0 + Duration::from_secs(59)).is_none());
    }

    #[test]
    fn cooldown_map_is_purged_past_threshold() {
        let tracker = tracker();
        let t0 = Instant::now();
        for user in 0..=XP_COOLDOWN_CACHE_THRESHOLD as u64 {
            tracker.on_message(user, t0);
        }
        tracker.on_message(10_000, t0 + Duration::from_secs(120));
        assert_eq!(tracker.last_xp.len(), 1);
    }

    #[test]
    fn cooldown_map_keeps_newest_users_past_hard_cap() {
        let tracker = tracker();
        let t0 = Instant::now();
        // Everyone is still inside the cooldown, so nothing expires.
        for user in 0..=XP_COOLDOWN_CACHE_MAX_SIZE as u64 + 10 {
            tracker.on_message(user, t0 + Duration::from_millis(user));
        }

        assert_eq!(tracker.last_xp.len(), XP_COOLDOWN_CACHE_MAX_SIZE);
        assert!(!tracker.last_xp.contains_key(&0));
        assert!(tracker.last_xp.contains_key(&(XP_COOLDOWN_CACHE_MAX_SIZE as u64 + 10)));
    }
}
