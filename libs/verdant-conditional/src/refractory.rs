//! Refractory gate: suppresses evaluation during the cool-down after a trigger

use crate::types::MAX_RULE_DURATION;
use std::time::Duration;
use tokio::time::Instant;

/// `now + delay`, falling back to the furthest representable deadline
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(MAX_RULE_DURATION))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
pub struct RefractoryGate {
    window: Duration,
    clear_at: Instant,
}

impl RefractoryGate {
    /// Gate that is open from `now`
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            clear_at: now,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        now >= self.clear_at
    }

    /// Close the gate for one window after a trigger at `now`
    pub fn record_trigger(&mut self, now: Instant) {
        if !self.window.is_zero() {
            self.clear_at = deadline_after(now, self.window);
        }
    }

    pub fn clear_at(&self) -> Instant {
        self.clear_at
    }

    /// Time until the gate opens again
    pub fn remaining(&self, now: Instant) -> Duration {
        self.clear_at.saturating_duration_since(now)
    }
}
