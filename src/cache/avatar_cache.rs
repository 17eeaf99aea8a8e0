use chrono::{FixedOffset, NaiveDate};
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};
use tracing::info;

use crate::{clock::Clock, identity::Identity};

/// Outcome of reconciling a cached identity with a fresh lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoosterUpdate {
    /// The user is not cached; nothing was written.
    NotCached,
    /// Cached booster flag already matched.
    Unchanged,
    /// Booster flag differed and the cached identity was replaced.
    Updated,
}

struct Inner {
    entries: LruCache<u64, Identity>,
    cleared_on: NaiveDate,
}

/// Bounded LRU cache of Discord identities keyed by user id.
///
/// Besides LRU eviction, the whole cache is flushed the first time it is
/// read or written on a new calendar day in the configured timezone. Avatar, name and
/// booster drift is tolerated for up to a day instead of being tracked per
/// field.
pub struct AvatarCache {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl AvatarCache {
    pub fn new(max_size: usize, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        let cleared_on = clock.today(offset);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                cleared_on,
            }),
            clock,
            offset,
        }
    }

    /// Returns the cached identity and marks it most recently used.
    pub fn get(&self, user_id: u64) -> Option<Identity> {
        let mut inner = self.inner.lock();
        self.roll_over(&mut inner);
        inner.entries.get(&user_id).cloned()
    }

    /// Inserts or replaces an identity, evicting the least recently used
    /// entry when full.
    pub fn set(&self, user_id: u64, identity: Identity) {
        let mut inner = self.inner.lock();
        self.roll_over(&mut inner);
        inner.entries.put(user_id, identity);
    }

    /// Evicts one user. Absent ids are ignored.
    pub fn remove(&self, user_id: u64) -> Option<Identity> {
        self.inner.lock().entries.pop(&user_id)
    }

    /// Snapshot of cached ids, least recently used first.
    ///
    /// The lock is released before returning so callers can do network I/O
    /// per id without blocking readers. Does not roll the day over: the
    /// midnight refresh works on the ids cached during the previous day.
    pub fn list_keys(&self) -> Vec<u64> {
        let inner = self.inner.lock();
        inner.entries.iter().rev().map(|(id, _)| *id).collect()
    }

    /// Sets the booster flag of a cached user.
    ///
    /// Used for push invalidation from gateway events. Does not promote the
    /// entry.
    pub fn set_booster(&self, user_id: u64, is_booster: bool) -> BoosterUpdate {
        let mut inner = self.inner.lock();
        self.roll_over(&mut inner);
        match inner.entries.peek_mut(&user_id) {
            None => BoosterUpdate::NotCached,
            Some(cached) if cached.is_booster == is_booster => BoosterUpdate::Unchanged,
            Some(cached) => {
                cached.is_booster = is_booster;
                BoosterUpdate::Updated
            }
        }
    }

    /// Replaces the cached identity with `fresh` when the booster flag changed.
    ///
    /// The compare and the write happen under one lock so concurrent
    /// refreshes cannot lose an update. Like [`AvatarCache::list_keys`], this
    /// leaves the day rollover to readers.
    pub fn reconcile(&self, user_id: u64, fresh: Identity) -> BoosterUpdate {
        let mut inner = self.inner.lock();
        match inner.entries.peek_mut(&user_id) {
            None => BoosterUpdate::NotCached,
            Some(cached) if cached.is_booster == fresh.is_booster => BoosterUpdate::Unchanged,
            Some(cached) => {
                *cached = fresh;
                BoosterUpdate::Updated
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    fn roll_over(&self, inner: &mut Inner) {
        let today = self.clock.today(self.offset);
        if inner.cleared_on != today {
            let dropped = inner.entries.len();
            inner.entries.clear();
            inner.cleared_on = today;
            info!("🔄 Avatar cache cleared for new day {} ({} entries)", today, dropped);
        }
    }
}
