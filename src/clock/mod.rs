//! Synchronizes simulated time across components

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

/// Wrapper around an epoch timestamp in milliseconds.
///
/// Exchange records expose timestamps both as the raw integer and as an ISO-8601
/// string; the internal representation with the time package stays hidden from
/// clients so the dependency can be swapped later.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DateTime(i64);

impl DateTime {
    /// ISO-8601 representation at second resolution, UTC.
    pub fn isoformat(&self) -> String {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        if let Ok(date) = OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000) {
            //The formatter cannot fail on a fixed description with a valid date
            date.format(&format).unwrap()
        } else {
            panic!("Tried to format non-date value");
        }
    }
}

impl Deref for DateTime {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<i64> for DateTime {
    fn from(v: i64) -> Self {
        DateTime(v)
    }
}

impl From<DateTime> for i64 {
    fn from(v: DateTime) -> Self {
        v.0
    }
}

#[doc(hidden)]
#[derive(Debug)]
pub struct TimerInner {
    start: DateTime,
    end: DateTime,
    step: i64,
    current: DateTime,
}

/// Drives the simulated clock.
///
/// Yields successive tick timestamps from start to end in fixed steps. The driver and
/// the exchange hold the same underlying state so [Timer] is wrapped in [Arc] and can
/// be cheaply cloned with references held across the application.
///
/// Time never rewinds: [Timer::advance] is the only mutation and only moves forward.
#[derive(Debug)]
pub struct Timer {
    inner: Arc<Mutex<TimerInner>>,
}

impl Clone for Timer {
    fn clone(&self) -> Self {
        Timer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Timer {
    pub fn new(start: impl Into<DateTime>, end: impl Into<DateTime>, step: i64) -> Self {
        assert!(step > 0, "Timer step must be positive");
        let start_val = start.into();
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                start: start_val,
                end: end.into(),
                step,
                current: start_val,
            })),
        }
    }

    pub fn now(&self) -> DateTime {
        let inner = self.inner.lock().unwrap();
        inner.current
    }

    pub fn start(&self) -> DateTime {
        let inner = self.inner.lock().unwrap();
        inner.start
    }

    pub fn step(&self) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner.step
    }

    /// Moves the clock one step forward. Returns true once the clock has run past its
    /// end date and the backtest is done.
    pub fn advance(&mut self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.current = DateTime::from(*inner.current + inner.step);
        inner.current > inner.end
    }

    /// Walks the clock forward until it reaches the given timestamp. Panics if the
    /// target is in the past or off the tick grid, both of which indicate a test or
    /// driver bug rather than a data problem.
    pub fn advance_to(&mut self, timestamp: impl Into<DateTime>) {
        let target = timestamp.into();
        assert!(
            target >= self.now(),
            "Tried to advance the timer backwards"
        );
        while self.now() < target {
            self.advance();
        }
        assert!(self.now() == target, "Target timestamp is off the tick grid");
    }
}

#[cfg(test)]
mod tests {
    use super::{DateTime, Timer};

    #[test]
    fn test_that_timer_advances_by_step_until_done() {
        let mut timer = Timer::new(100, 400, 100);
        assert_eq!(*timer.now(), 100);

        assert!(!timer.advance());
        assert!(!timer.advance());
        assert!(!timer.advance());
        assert_eq!(*timer.now(), 400);
        assert!(timer.advance());
    }

    #[test]
    fn test_that_cloned_timers_share_state() {
        let mut timer = Timer::new(100, 400, 100);
        let watcher = timer.clone();

        timer.advance();
        assert_eq!(*watcher.now(), 200);
    }

    #[test]
    fn test_that_advance_to_walks_the_grid() {
        let mut timer = Timer::new(1_517_599_560_000_i64, 1_517_604_900_000_i64, 60_000);
        timer.advance_to(1_517_599_740_000_i64);
        assert_eq!(*timer.now(), 1_517_599_740_000);
    }

    #[test]
    #[should_panic]
    fn test_that_rewinding_the_timer_panics() {
        let mut timer = Timer::new(100, 400, 100);
        timer.advance();
        timer.advance_to(100);
    }

    #[test]
    fn test_that_datetime_formats_to_iso() {
        let date = DateTime::from(1_517_599_560_000_i64);
        assert_eq!(date.isoformat(), "2018-02-02T19:26:00");
    }
}
