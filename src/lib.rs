//! Core of the community bot: response and identity caching, request
//! admission control, and the daily background tasks that keep both fresh.

pub mod api;
pub mod bot;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;
pub mod scheduler;
pub mod storage;
pub mod ui;

pub use error::{BotError, Result};
