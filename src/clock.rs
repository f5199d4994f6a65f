//! Time source used for timestamps, the dedup window and the circuit breaker.

use crate::lock;
use chrono::{DateTime, Utc};
use std::{fmt::Debug, sync::Mutex, time::Duration};

/// A source of the current time.
pub trait Clock: Debug + Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// ```
/// use client_telemetry::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new("2024-03-01T00:00:00Z".parse().unwrap());
/// clock.advance(Duration::from_secs(5));
/// assert_eq!("2024-03-01T00:00:05Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap(), clock.now());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now = chrono::Duration::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jump to an arbitrary instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Time elapsed from `since` to `now`; zero if the clock went backwards.
pub(crate) fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
