//! Rate limiting for progress callbacks.

use std::time::{Duration, Instant};

/// Lets an event through at most once per interval.
///
/// The first call always passes; [`Throttle::force`] marks a terminal event
/// that must be delivered regardless of the interval.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// True when enough time has passed since the last admitted event.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Admit unconditionally (used for the final `done` report).
    pub fn force(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
