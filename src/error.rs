//! Error types shared across the bot core.
//!
//! Cache misses and rate-limit rejections are ordinary return values and never
//! appear here. `BotError` only covers real faults: I/O and serialization
//! failures in the snapshot store, and upstream calls to Discord that failed
//! or timed out. Configuration problems are reported through `anyhow` at
//! startup.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = BotError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum BotError {
    /// Filesystem error from the snapshot store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Snapshot store file could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Discord API error.
    ///
    /// Boxed because `serenity::Error` is large and would inflate every
    /// `Result` in the crate.
    #[error(transparent)]
    Discord(#[from] Box<serenity::Error>),

    /// An upstream call exceeded its deadline.
    #[error("{operation} timed out after {}", humantime::format_duration(*.after))]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Persistent store rejected an operation.
    #[error("store error: {0}")]
    Store(String),

    /// Dashboard API server failed to bind or serve.
    #[error("api server error: {0}")]
    Server(String),
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Discord(Box::new(err))
    }
}
