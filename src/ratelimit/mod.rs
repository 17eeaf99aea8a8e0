//! Request admission control.
//!
//! Two limiters with the same fixed-window shape:
//!
//! - [`ApiRateLimiter`]: per client IP, guards the dashboard API.
//! - [`Cooldowns`]: per user and [`ActionClass`], guards chat commands.
//!
//! Neither ever fails. A rejection is a [`RateDecision::Limited`] value and
//! the caller decides how to tell the user.

pub mod api;
pub mod cooldown;

pub use api::{ApiRateLimiter, ApiRateLimiterConfig};
pub use cooldown::Cooldowns;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// Request rejected; the subject may retry after this long.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    /// Whole seconds to wait, rounded up. Zero when allowed.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            RateDecision::Allowed { .. } => 0,
            RateDecision::Limited { retry_after } => ceil_secs(*retry_after),
        }
    }
}

pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Command families that share one cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// Media downloads from social links.
    Download,
    /// Image search.
    ImageSearch,
    /// Image/video format conversion.
    Convert,
    /// Interaction commands (hug, slap, ...).
    Action,
    /// Games and jokes.
    Fun,
    /// Temporary voice channel creation.
    TempVoice,
    /// Profile, rank and weather lookups.
    Lookup,
}

impl ActionClass {
    pub const ALL: [ActionClass; 7] = [
        ActionClass::Download,
        ActionClass::ImageSearch,
        ActionClass::Convert,
        ActionClass::Action,
        ActionClass::Fun,
        ActionClass::TempVoice,
        ActionClass::Lookup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Download => "download",
            ActionClass::ImageSearch => "image_search",
            ActionClass::Convert => "convert",
            ActionClass::Action => "action",
            ActionClass::Fun => "fun",
            ActionClass::TempVoice => "temp_voice",
            ActionClass::Lookup => "lookup",
        }
    }

    pub fn default_cooldown(&self) -> Duration {
        let secs = match self {
            ActionClass::Download => 300,
            ActionClass::ImageSearch => 60,
            ActionClass::Convert => 10,
            ActionClass::Action => 10,
            ActionClass::Fun => 30,
            ActionClass::TempVoice => 5,
            ActionClass::Lookup => 300,
        };
        Duration::from_secs(secs)
    }

    /// Maps a slash command name to the cooldown it is charged against.
    pub fn for_command(name: &str) -> Option<Self> {
        match name {
            "download" => Some(ActionClass::Download),
            "image" => Some(ActionClass::ImageSearch),
            "convert" => Some(ActionClass::Convert),
            "action" | "hug" | "slap" | "kiss" | "pat" => Some(ActionClass::Action),
            "fun" | "roulette" | "8ball" | "meme" => Some(ActionClass::Fun),
            "tempvoice" => Some(ActionClass::TempVoice),
            "get" | "rank" | "weather" => Some(ActionClass::Lookup),
            _ => None,
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionClass::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action class: {s}"))
    }
}
