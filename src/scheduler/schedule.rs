use chrono::{DateTime, Days, FixedOffset, TimeZone, Utc};
use std::{sync::Arc, time::Duration};

use crate::clock::Clock;

/// Next local midnight strictly after `now`, as a UTC instant.
pub fn next_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    local
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

pub fn until_next_midnight(now: DateTime<Utc>, offset: FixedOffset) -> Duration {
    (next_midnight(now, offset) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// When a loop fires next.
#[derive(Clone)]
pub enum Schedule {
    /// Fixed delay between the end of one run and the start of the next.
    Interval(Duration),
    /// Every local midnight in `offset`.
    DailyMidnight {
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    },
}

impl Schedule {
    pub fn next_delay(&self) -> Duration {
        match self {
            Schedule::Interval(period) => *period,
            Schedule::DailyMidnight { clock, offset } => until_next_midnight(clock.now(), *offset),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Schedule::Interval(period) => format!("every {}", humantime::format_duration(*period)),
            Schedule::DailyMidnight { offset, .. } => {
                format!("midnight UTC{:+}", offset.local_minus_utc() / 3600)
            }
        }
    }
}
