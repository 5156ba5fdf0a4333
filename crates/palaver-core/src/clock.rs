//! Injectable time source.
//!
//! Every timestamp-setting operation receives its notion of "now" from a
//! [`Clock`] rather than reading ambient time, so tests can pin the clock
//! and assert on exact values.

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use chrono::Duration;

    use super::*;

    /// A pinned clock for deterministic tests.  Services hold `&ManualClock`
    /// (references implement [`Clock`]), so the test keeps control.
    pub(crate) struct ManualClock {
        now: Cell<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn at(start: DateTime<Utc>) -> Self {
            Self {
                now: Cell::new(start),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.get()
        }
    }
}
