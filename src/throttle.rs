// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! A leading edge rate limiter.
//!
//! The first call in an interval fires immediately. Later calls in the same interval are parked,
//! latest wins, and the parked call fires once the next interval opens.
use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

/// The default minimum time between fires.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// A source of time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The tokio clock. Follows paused time in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Limits how often a call goes through.
pub struct RateLimiter<T, C = SystemClock> {
    interval: Duration,
    clock: C,
    last_fire: Option<Instant>,
    pending: Option<T>,
}

impl<T> RateLimiter<T, SystemClock> {
    pub fn new(interval: Duration) -> Self {
        RateLimiter::with_clock(interval, SystemClock)
    }
}

impl<T, C: Clock> RateLimiter<T, C> {
    pub fn with_clock(interval: Duration, clock: C) -> Self {
        RateLimiter {
            interval,
            clock,
            last_fire: None,
            pending: None,
        }
    }

    /// Returns the arguments back if the call should fire now. Otherwise parks them, replacing any
    /// previously parked arguments, and returns None.
    pub fn call(&mut self, args: T) -> Option<T> {
        let now = self.clock.now();
        if self.is_open(now) {
            self.last_fire = Some(now);
            // Anything parked is superseded by this call.
            self.pending = None;
            return Some(args);
        }
        self.pending = Some(args);
        None
    }

    /// Returns the parked arguments if the next interval has opened.
    pub fn poll(&mut self) -> Option<T> {
        let now = self.clock.now();
        if self.pending.is_none() || !self.is_open(now) {
            return None;
        }
        self.last_fire = Some(now);
        self.pending.take()
    }

    /// When parked arguments become due, if there are any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(
            self.last_fire
                .map_or_else(|| self.clock.now(), |last| last + self.interval),
        )
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn is_open(&self, now: Instant) -> bool {
        self.last_fire
            .map_or(true, |last| now.duration_since(last) >= self.interval)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{ManualClock, RateLimiter};

    fn limiter() -> (ManualClock, RateLimiter<u32, ManualClock>) {
        let clock = ManualClock::default();
        let limiter = RateLimiter::with_clock(Duration::from_millis(200), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_burst_fires_once() {
        let (clock, mut limiter) = limiter();

        let mut fired = Vec::new();
        for i in 0..10 {
            fired.extend(limiter.call(i));
            fired.extend(limiter.poll());
            clock.advance(Duration::from_millis(5));
        }

        // Ten calls within 50ms fire exactly once, on the leading edge.
        assert_eq!(vec![0], fired);
        assert!(limiter.has_pending());
    }

    #[test]
    fn test_trailing_call_fires_when_interval_opens() {
        let (clock, mut limiter) = limiter();
        assert_eq!(Some(1), limiter.call(1));
        assert_eq!(None, limiter.call(2));
        assert_eq!(None, limiter.call(3));

        let deadline = limiter.deadline().expect("deadline");
        clock.advance(Duration::from_millis(199));
        assert_eq!(None, limiter.poll());

        clock.advance(Duration::from_millis(1));
        assert_eq!(deadline, super::Clock::now(&clock));
        // Latest wins.
        assert_eq!(Some(3), limiter.poll());
        assert_eq!(None, limiter.poll());
        assert_eq!(None, limiter.deadline());

        // The trailing fire opened a new interval.
        assert_eq!(None, limiter.call(4));
    }

    #[test]
    fn test_calls_after_interval_fire_immediately() {
        let (clock, mut limiter) = limiter();
        assert_eq!(Some(1), limiter.call(1));
        clock.advance(Duration::from_millis(250));
        assert_eq!(Some(2), limiter.call(2));
        assert!(!limiter.has_pending());
    }

    #[test]
    fn test_leading_call_drops_stale_pending() {
        let (clock, mut limiter) = limiter();
        limiter.call(1);
        limiter.call(2);
        clock.advance(Duration::from_millis(300));
        assert_eq!(Some(3), limiter.call(3));
        assert_eq!(None, limiter.poll());
    }
}
