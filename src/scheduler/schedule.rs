//! When a monitor fires.

use std::fmt;
use std::time::Duration;

use chrono::{Days, NaiveDateTime, NaiveTime};
use rand::Rng;

/// Cadence of a monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed delay after each run.
    Every(Duration),
    /// Random delay in `[min, max]` after each run.
    Jittered {
        /// Shortest delay.
        min: Duration,
        /// Longest delay.
        max: Duration,
    },
    /// Next occurrence of a local wall-clock time.
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Daily at `h:m:s`; out-of-range values fall back to midnight.
    pub fn daily(hour: u32, min: u32, sec: u32) -> Self {
        Schedule::DailyAt(NaiveTime::from_hms_opt(hour, min, sec).unwrap_or(NaiveTime::MIN))
    }

    /// Whether the task is anchored to wall-clock time.
    pub fn is_wall_clock(&self) -> bool {
        matches!(self, Schedule::DailyAt(_))
    }

    /// Delay from `now` until the next run.
    pub fn next_delay(&self, now: NaiveDateTime) -> Duration {
        match *self {
            Schedule::Every(period) => period,
            Schedule::Jittered { min, max } => {
                if max <= min {
                    return min;
                }
                let ms = rand::rng().random_range(min.as_millis()..=max.as_millis());
                Duration::from_millis(ms as u64)
            }
            Schedule::DailyAt(at) => until_next(now, at),
        }
    }
}

/// Delay until the next `at` strictly after `now`.
pub fn until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let target = if today > now {
        today
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at))
            .unwrap_or(today)
    };
    (target - now).to_std().unwrap_or_default()
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(d) => write!(f, "every {}s", d.as_secs_f64()),
            Schedule::Jittered { min, max } => {
                write!(f, "every {}-{}s", min.as_secs(), max.as_secs())
            }
            Schedule::DailyAt(t) => write!(f, "daily at {}", t.format("%H:%M:%S")),
        }
    }
}
