use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;

use crate::contract::ValidationError;

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 15;
/// Hard cap on one invocation of any component.
pub const MAX_INVOCATION_BUDGET: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    minutes: u32,
}

impl PollInterval {
    pub fn from_minutes(minutes: u32) -> Result<Self, ValidationError> {
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
            return Err(ValidationError::new(format!(
                "interval must be between {MIN_INTERVAL_MINUTES} and {MAX_INTERVAL_MINUTES} minutes, got {minutes}"
            )));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn period(self) -> Duration {
        Duration::from_secs(u64::from(self.minutes) * 60)
    }

    /// Time budget granted to one invocation fired by this schedule.
    pub fn invocation_budget(self) -> Duration {
        self.period().min(MAX_INVOCATION_BUDGET)
    }
}

/// Half-open window `(start, end]` of modification times a monitor asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryWindow {
    pub after: DateTime<Utc>,
    pub on_or_before: DateTime<Utc>,
}

impl QueryWindow {
    /// Window ending at the minute `fired_at` falls in and reaching back
    /// `lookback_minutes`.
    pub fn ending_at(fired_at: DateTime<Utc>, lookback_minutes: u32) -> Self {
        let on_or_before = fired_at
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(fired_at);
        let after = on_or_before - TimeDelta::minutes(i64::from(lookback_minutes));
        Self {
            after,
            on_or_before,
        }
    }

    /// Like [`QueryWindow::ending_at`], but reaching back to `polled_through`
    /// when the source's last complete poll is older than the lookback.
    pub fn resuming(
        fired_at: DateTime<Utc>,
        lookback_minutes: u32,
        polled_through: Option<DateTime<Utc>>,
    ) -> Self {
        let mut window = Self::ending_at(fired_at, lookback_minutes);
        if let Some(polled_through) = polled_through {
            window.after = window.after.min(polled_through);
        }
        window
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant > self.after && instant <= self.on_or_before
    }
}
