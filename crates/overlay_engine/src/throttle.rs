//! Throttle with a guaranteed trailing call.
//!
//! Fires at most once per interval while input keeps arriving and always
//! fires once more for the last input. Unlike a debounce, a steady stream
//! of input cannot postpone firing forever: the deferral is measured from
//! the last time the throttle actually fired, not from the last input.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Fire immediately.
    FireNow,
    /// Fire after this delay unless superseded by newer input.
    Defer(Duration),
}

#[derive(Debug, Clone)]
pub struct TrailingThrottle {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl TrailingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// What to do with input arriving at `now`.
    pub fn decide(&self, now: Instant) -> ThrottleDecision {
        match self.last_fired {
            None => ThrottleDecision::FireNow,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.interval {
                    ThrottleDecision::FireNow
                } else {
                    ThrottleDecision::Defer(self.interval - elapsed)
                }
            }
        }
    }

    /// Record that a call actually went out at `now`.
    pub fn mark_fired(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }
}
