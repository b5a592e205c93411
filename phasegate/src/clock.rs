//! Wall-clock source for run timestamps.

use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of timestamps for a run. Must be monotonic within a run.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// System clock anchored to a monotonic [`Instant`].
///
/// The wall-clock time is sampled once at construction; later readings add the
/// monotonic elapsed time, so system clock adjustments never make a run's end
/// precede its start.
#[derive(Debug, Clone)]
pub struct SystemClock {
    wall: DateTime<Utc>,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or(TimeDelta::zero());
        self.wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
