use anyhow::Result;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::clock::offset_from_hours;
use crate::ratelimit::ActionClass;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: u64,
    pub owner_id: Option<u64>,

    // Dashboard API
    pub api_host: String,
    pub api_port: u16,

    // Caché
    pub cache_max_size: usize,
    pub stats_cache_ttl: u64,       // En segundos
    pub leaderboard_cache_ttl: u64, // En segundos
    pub avatar_cache_max_size: usize,

    // Rate limiting HTTP
    pub rate_limit_requests: u32,
    pub rate_limit_window: u64, // En segundos
    pub rate_limit_burst: u32,
    pub rate_limit_max_tracked: usize,

    // Cooldowns de comandos
    pub cooldown_max_tracked: usize,
    pub cooldowns: Vec<(ActionClass, u64)>,

    // XP
    pub xp_message_min: u64,
    pub xp_message_max: u64,
    pub xp_message_cooldown: u64, // En segundos
    pub xp_voice_per_min: u64,

    // Tareas en segundo plano
    pub cache_sweep_interval: u64, // En segundos
    pub snapshot_retention_days: u32,
    pub refresh_utc_offset: i32, // Horas respecto a UTC
    pub snapshot_utc_offset: i32,
    pub member_fetch_timeout: u64, // En segundos

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let cooldowns = ActionClass::ALL
            .iter()
            .map(|action| {
                let var = format!("COOLDOWN_{}", action.as_str().to_uppercase());
                let secs = env_or(&var, action.default_cooldown().as_secs())?;
                Ok((*action, secs))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID")?.parse()?,
            owner_id: std::env::var("OWNER_ID").ok().and_then(|s| s.parse().ok()),

            // Dashboard API
            api_host: std::env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: env_or("API_PORT", defaults.api_port)?,

            // Caché
            cache_max_size: env_or("CACHE_MAX_SIZE", defaults.cache_max_size)?,
            stats_cache_ttl: env_or("STATS_CACHE_TTL", defaults.stats_cache_ttl)?,
            leaderboard_cache_ttl: env_or("LEADERBOARD_CACHE_TTL", defaults.leaderboard_cache_ttl)?,
            avatar_cache_max_size: env_or("AVATAR_CACHE_MAX_SIZE", defaults.avatar_cache_max_size)?,

            // Rate limiting HTTP
            rate_limit_requests: env_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window: env_or("RATE_LIMIT_WINDOW", defaults.rate_limit_window)?,
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_max_tracked: env_or("RATE_LIMIT_MAX_TRACKED", defaults.rate_limit_max_tracked)?,

            // Cooldowns
            cooldown_max_tracked: env_or("COOLDOWN_MAX_TRACKED", defaults.cooldown_max_tracked)?,
            cooldowns,

            // XP
            xp_message_min: env_or("XP_MESSAGE_MIN", defaults.xp_message_min)?,
            xp_message_max: env_or("XP_MESSAGE_MAX", defaults.xp_message_max)?,
            xp_message_cooldown: env_or("XP_MESSAGE_COOLDOWN", defaults.xp_message_cooldown)?,
            xp_voice_per_min: env_or("XP_VOICE_PER_MIN", defaults.xp_voice_per_min)?,

            // Tareas en segundo plano
            cache_sweep_interval: env_or("CACHE_SWEEP_INTERVAL", defaults.cache_sweep_interval)?,
            snapshot_retention_days: env_or("SNAPSHOT_RETENTION_DAYS", defaults.snapshot_retention_days)?,
            refresh_utc_offset: env_or("REFRESH_UTC_OFFSET", defaults.refresh_utc_offset)?,
            snapshot_utc_offset: env_or("SNAPSHOT_UTC_OFFSET", defaults.snapshot_utc_offset)?,
            member_fetch_timeout: env_or("MEMBER_FETCH_TIMEOUT", defaults.member_fetch_timeout)?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Every size, TTL and window must be non-zero, and both UTC offsets
    /// must be real timezones (within ±23 hours).
    pub fn validate(&self) -> Result<()> {
        if self.cache_max_size == 0 {
            anyhow::bail!("Response cache size must be greater than 0");
        }

        if self.avatar_cache_max_size == 0 {
            anyhow::bail!("Avatar cache size must be greater than 0");
        }

        if self.stats_cache_ttl == 0 || self.leaderboard_cache_ttl == 0 {
            anyhow::bail!("Cache TTLs must be greater than 0");
        }

        if self.rate_limit_requests == 0 || self.rate_limit_window == 0 {
            anyhow::bail!(
                "Rate limit must allow at least 1 request per window, got {}/{}s",
                self.rate_limit_requests,
                self.rate_limit_window
            );
        }

        if self.rate_limit_burst == 0 {
            anyhow::bail!("Rate limit burst must be greater than 0");
        }

        if self.cooldown_max_tracked == 0 || self.rate_limit_max_tracked == 0 {
            anyhow::bail!("Tracked-subject caps must be greater than 0");
        }

        if self.xp_message_min > self.xp_message_max {
            anyhow::bail!(
                "XP range is empty: min {} > max {}",
                self.xp_message_min,
                self.xp_message_max
            );
        }

        if self.cache_sweep_interval == 0 {
            anyhow::bail!("Cache sweep interval must be greater than 0");
        }

        if self.snapshot_retention_days == 0 {
            anyhow::bail!("Snapshot retention must keep at least 1 day");
        }

        for hours in [self.refresh_utc_offset, self.snapshot_utc_offset] {
            if offset_from_hours(hours).is_none() {
                anyhow::bail!("UTC offset out of range: {}", hours);
            }
        }

        Ok(())
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl)
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_cache_ttl)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.member_fetch_timeout)
    }

    pub fn xp_cooldown(&self) -> Duration {
        Duration::from_secs(self.xp_message_cooldown)
    }

    pub fn refresh_offset(&self) -> FixedOffset {
        offset_from_hours(self.refresh_utc_offset).unwrap_or_else(utc)
    }

    pub fn snapshot_offset(&self) -> FixedOffset {
        offset_from_hours(self.snapshot_utc_offset).unwrap_or_else(utc)
    }

    pub fn cooldown_for(&self, action: ActionClass) -> Duration {
        let secs = self
            .cooldowns
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, secs)| *secs)
            .unwrap_or_else(|| action.default_cooldown().as_secs());
        Duration::from_secs(secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {} (Owner: {})\n  \
            API: {}:{}\n  \
            Cache: {} responses (stats {}s, leaderboard {}s), {} avatars\n  \
            Rate limit: {}/{}s burst {}, {} tracked IPs\n  \
            Tasks: sweep every {}s, refresh UTC{:+}, snapshots UTC{:+} kept {} days",
            self.guild_id,
            self.owner_id.map_or("none".to_string(), |id| id.to_string()),
            self.api_host,
            self.api_port,
            self.cache_max_size,
            self.stats_cache_ttl,
            self.leaderboard_cache_ttl,
            self.avatar_cache_max_size,
            self.rate_limit_requests,
            self.rate_limit_window,
            self.rate_limit_burst,
            self.rate_limit_max_tracked,
            self.cache_sweep_interval,
            self.refresh_utc_offset,
            self.snapshot_utc_offset,
            self.snapshot_retention_days
        )
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn env_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: 0,
            owner_id: None,

            api_host: "0.0.0.0".to_string(),
            api_port: 8088,

            cache_max_size: 200,
            stats_cache_ttl: 60,
            leaderboard_cache_ttl: 30,
            avatar_cache_max_size: 500,

            rate_limit_requests: 60,
            rate_limit_window: 60,
            rate_limit_burst: 10,
            rate_limit_max_tracked: 10_000,

            cooldown_max_tracked: 100,
            cooldowns: ActionClass::ALL
                .iter()
                .map(|a| (*a, a.default_cooldown().as_secs()))
                .collect(),

            xp_message_min: 15,
            xp_message_max: 25,
            xp_message_cooldown: 60,
            xp_voice_per_min: 5,

            cache_sweep_interval: 120,
            snapshot_retention_days: 35,
            refresh_utc_offset: -5, // EST
            snapshot_utc_offset: 0,
            member_fetch_timeout: 2,

            data_dir: "./data".into(),
        }
    }
}
