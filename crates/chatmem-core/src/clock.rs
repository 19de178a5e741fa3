//! Time source for record timestamps.
//!
//! Timestamps are persisted as integer microseconds since the Unix epoch and
//! exposed as `DateTime<Utc>`.

use chrono::{DateTime, Utc};

/// Clock trait for time operations
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Inverse of [`to_micros`]. Out-of-range values clamp to the epoch.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod manual {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Test clock: every reading advances by a fixed step, so consecutive
    /// writes always get strictly increasing timestamps.
    #[derive(Debug)]
    pub struct ManualClock {
        micros: AtomicI64,
        step: i64,
    }

    impl ManualClock {
        pub fn starting_at(start: DateTime<Utc>, step_micros: i64) -> Self {
            Self {
                micros: AtomicI64::new(to_micros(start)),
                step: step_micros,
            }
        }

        pub fn advance(&self, micros: i64) {
            self.micros.fetch_add(micros, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            from_micros(self.micros.fetch_add(self.step, Ordering::SeqCst))
        }
    }
}
