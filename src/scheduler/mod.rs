//! # Background Scheduler
//!
//! Long-running maintenance loops owned by the process:
//!
//! - **Cache sweep**: every `CACHE_SWEEP_INTERVAL` seconds, drops expired
//!   responses and idle rate-limit clients.
//! - **Booster refresh**: at local midnight (`REFRESH_UTC_OFFSET`), re-reads
//!   every cached identity from the member API.
//! - **Daily snapshot**: at midnight (`SNAPSHOT_UTC_OFFSET`), snapshots every
//!   active member and applies retention.
//!
//! Each loop is "compute delay, sleep, run, repeat". A failed run is logged
//! and followed by a one-hour pause; only [`BackgroundTasks::stop`] ends a
//! loop.

pub mod schedule;
pub mod tasks;

pub use schedule::{next_midnight, until_next_midnight, Schedule};
pub use tasks::{BoosterRefresh, CacheSweep, DailySnapshot, RefreshReport, ScheduledTask, Throttle};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    cache::CacheService, clock::Clock, config::Config, identity::IdentitySource,
    ratelimit::ApiRateLimiter, storage::SnapshotStore,
};

/// Pause after a failed run before the loop resumes its schedule.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Scheduled { next_fire: Instant },
    Executing,
}

/// One spawned loop and the handle needed to await it.
struct TaskLoop {
    name: &'static str,
    state: Arc<RwLock<LoopState>>,
    handle: Option<JoinHandle<()>>,
}

/// Owns every background loop and their shared cancellation token.
pub struct BackgroundTasks {
    token: CancellationToken,
    loops: Vec<TaskLoop>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            loops: Vec::new(),
        }
    }

    /// Spawns `task` on `schedule`. Must be called inside a Tokio runtime.
    pub fn spawn(&mut self, task: Arc<dyn ScheduledTask>, schedule: Schedule, backoff: Duration) {
        let name = task.name();
        let state = Arc::new(RwLock::new(LoopState::Running));
        let token = self.token.child_token();

        info!("⏰ Background task {} scheduled {}", name, schedule.describe());

        let handle = tokio::spawn(run_loop(task, schedule, backoff, token, state.clone()));

        self.loops.push(TaskLoop {
            name,
            state,
            handle: Some(handle),
        });
    }

    pub fn states(&self) -> Vec<(&'static str, LoopState)> {
        self.loops
            .iter()
            .map(|task| (task.name, *task.state.read()))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.loops.iter().any(|task| task.handle.is_some())
    }

    /// Cancels every loop and waits until all of them have exited.
    pub async fn stop(&mut self) {
        self.token.cancel();

        let handles: Vec<_> = self
            .loops
            .iter_mut()
            .filter_map(|task| task.handle.take().map(|handle| (task.name, handle)))
            .collect();
        if handles.is_empty() {
            return;
        }

        let results = join_all(handles.into_iter().map(|(name, handle)| async move {
            (name, handle.await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                error!("Background task {} ended abnormally: {}", name, e);
            }
        }

        info!("⏹️ Background tasks stopped");
    }
}

async fn run_loop(
    task: Arc<dyn ScheduledTask>,
    schedule: Schedule,
    backoff: Duration,
    token: CancellationToken,
    state: Arc<RwLock<LoopState>>,
) {
    let name = task.name();
    let mut delay = schedule.next_delay();

    loop {
        *state.write() = LoopState::Scheduled {
            next_fire: Instant::now() + delay,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        *state.write() = LoopState::Executing;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = task.run() => result,
        };

        delay = match result {
            Ok(()) => schedule.next_delay(),
            Err(e) => {
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
                error!(
                    "❌ Background task {} failed: {} (retrying in {}, at {})",
                    name,
                    e,
                    humantime::format_duration(backoff),
                    retry_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                backoff
            }
        };
    }

    *state.write() = LoopState::Stopped;
}

/// Everything the production loops need.
pub struct SchedulerDeps {
    pub config: Config,
    pub cache: Arc<CacheService>,
    pub limiter: Arc<ApiRateLimiter>,
    pub source: Arc<dyn IdentitySource>,
    pub store: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn Clock>,
}

/// Bootstraps yesterday's snapshot, then starts the three loops.
pub async fn start(deps: SchedulerDeps) -> BackgroundTasks {
    let SchedulerDeps {
        config,
        cache,
        limiter,
        source,
        store,
        clock,
    } = deps;

    let snapshot = Arc::new(DailySnapshot::new(
        store,
        clock.clone(),
        config.guild_id,
        config.snapshot_offset(),
        config.snapshot_retention_days,
    ));

    if let Err(e) = snapshot.bootstrap().await {
        warn!("⚠️ Snapshot bootstrap failed: {}", e);
    }

    let mut tasks = BackgroundTasks::new();

    tasks.spawn(
        Arc::new(CacheSweep::new(cache.clone(), limiter)),
        Schedule::Interval(config.sweep_interval()),
        config.sweep_interval(),
    );

    tasks.spawn(
        Arc::new(BoosterRefresh::new(
            cache,
            source,
            config.fetch_timeout(),
            Throttle::default(),
        )),
        Schedule::DailyMidnight {
            clock: clock.clone(),
            offset: config.refresh_offset(),
        },
        ERROR_BACKOFF,
    );

    tasks.spawn(
        snapshot,
        Schedule::DailyMidnight {
            clock,
            offset: config.snapshot_offset(),
        },
        ERROR_BACKOFF,
    );

    info!("⏰ Background tasks started");
    tasks
}
