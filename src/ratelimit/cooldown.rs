use dashmap::DashMap;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use super::{ActionClass, RateDecision};
use crate::config::Config;

/// Last use per user for one action class.
#[derive(Debug)]
struct CooldownTable {
    period: Duration,
    last_use: HashMap<u64, Instant>,
}

impl CooldownTable {
    fn new(period: Duration) -> Self {
        Self {
            period,
            last_use: HashMap::new(),
        }
    }

    /// Keeps the table at or under `max_tracked`: expired entries go first,
    /// then the oldest uses.
    fn trim(&mut self, now: Instant, max_tracked: usize) {
        if self.last_use.len() <= max_tracked {
            return;
        }

        let period = self.period;
        self.last_use
            .retain(|_, used_at| now.saturating_duration_since(*used_at) < period);

        while self.last_use.len() > max_tracked {
            let oldest = self
                .last_use
                .iter()
                .min_by_key(|(_, used_at)| **used_at)
                .map(|(user_id, _)| *user_id);
            match oldest {
                Some(user_id) => {
                    self.last_use.remove(&user_id);
                }
                None => break,
            }
        }
    }
}

/// Per-user command cooldowns, one table per [`ActionClass`].
///
/// A successful check records the use, so each call is one attempt.
pub struct Cooldowns {
    tables: DashMap<ActionClass, CooldownTable>,
    max_tracked: usize,
}

impl Cooldowns {
    pub fn new(periods: &[(ActionClass, Duration)], max_tracked: usize) -> Self {
        let tables = DashMap::new();
        for action in ActionClass::ALL {
            let period = periods
                .iter()
                .find(|(a, _)| *a == action)
                .map(|(_, period)| *period)
                .unwrap_or_else(|| action.default_cooldown());
            tables.insert(action, CooldownTable::new(period));
        }
        Self { tables, max_tracked }
    }

    pub fn from_config(config: &Config) -> Self {
        let periods: Vec<_> = ActionClass::ALL
            .iter()
            .map(|action| (*action, config.cooldown_for(*action)))
            .collect();
        Self::new(&periods, config.cooldown_max_tracked)
    }

    pub fn period(&self, action: ActionClass) -> Duration {
        self.tables
            .get(&action)
            .map(|table| table.period)
            .unwrap_or_else(|| action.default_cooldown())
    }

    pub fn check(&self, user_id: u64, action: ActionClass) -> RateDecision {
        self.check_at(user_id, action, Instant::now())
    }

    pub fn check_at(&self, user_id: u64, action: ActionClass, now: Instant) -> RateDecision {
        let mut table = self
            .tables
            .entry(action)
            .or_insert_with(|| CooldownTable::new(action.default_cooldown()));

        if let Some(used_at) = table.last_use.get(&user_id) {
            let elapsed = now.saturating_duration_since(*used_at);
            if elapsed < table.period {
                return RateDecision::Limited {
                    retry_after: table.period - elapsed,
                };
            }
        }

        table.last_use.insert(user_id, now);
        let before = table.last_use.len();
        table.trim(now, self.max_tracked);
        let trimmed = before - table.last_use.len();
        if trimmed > 0 {
            debug!("🧹 Cooldown table {} trimmed {} users", action, trimmed);
        }

        RateDecision::Allowed { remaining: 0 }
    }

    /// Gives a user their slot back, e.g. when the command failed upstream.
    pub fn reset(&self, user_id: u64, action: ActionClass) {
        if let Some(mut table) = self.tables.get_mut(&action) {
            table.last_use.remove(&user_id);
        }
    }

    pub fn tracked(&self, action: ActionClass) -> usize {
        self.tables
            .get(&action)
            .map(|table| table.last_use.len())
            .unwrap_or(0)
    }
}
