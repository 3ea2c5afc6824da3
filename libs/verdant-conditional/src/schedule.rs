//! Per-rule runtime schedule with drift correction
//!
//! Rebuilt from scratch whenever a rule definition is (re)loaded, so no timer
//! state survives a reconfiguration.

use crate::refractory::{deadline_after, RefractoryGate};
use crate::types::RuleDefinition;
use std::time::Duration;
use tokio::time::Instant;

/// What a scheduler tick should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Next fire time not reached yet
    NotDue,
    /// Due, but the refractory window is still closed
    Suppressed,
    /// Run one evaluation pass
    Evaluate,
}

#[derive(Debug, Clone)]
pub struct RuntimeSchedule {
    period: Duration,
    next_fire: Instant,
    refractory: RefractoryGate,
}

impl RuntimeSchedule {
    /// `next_fire = now + start_offset`, refractory gate open from `now`
    pub fn new(rule: &RuleDefinition, now: Instant) -> Self {
        Self {
            period: rule.period(),
            next_fire: deadline_after(now, rule.start_offset()),
            refractory: RefractoryGate::new(rule.refractory(), now),
        }
    }

    /// Advance the schedule for a tick at `now`
    ///
    /// When due, the next fire time moves forward by the smallest whole number
    /// of periods that puts it after `now`, so missed ticks collapse into one.
    pub fn on_tick(&mut self, now: Instant) -> TickDecision {
        if now < self.next_fire {
            return TickDecision::NotDue;
        }

        self.advance(now);

        if self.refractory.is_open(now) {
            TickDecision::Evaluate
        } else {
            TickDecision::Suppressed
        }
    }

    fn advance(&mut self, now: Instant) {
        let period_nanos = self.period.as_nanos();
        if period_nanos == 0 {
            // zero period evaluates on every tick
            self.next_fire = now;
            return;
        }
        let behind = now.duration_since(self.next_fire).as_nanos();
        let periods = behind / period_nanos + 1;
        let step = periods.saturating_mul(period_nanos).min(u128::from(u64::MAX));
        self.next_fire = deadline_after(self.next_fire, Duration::from_nanos(step as u64));
    }

    /// Close the refractory gate after a trigger at `now`
    pub fn record_trigger(&mut self, now: Instant) {
        self.refractory.record_trigger(now);
    }

    pub fn next_fire(&self) -> Instant {
        self.next_fire
    }

    pub fn refractory_clear_at(&self) -> Instant {
        self.refractory.clear_at()
    }

    pub fn next_fire_in(&self, now: Instant) -> Duration {
        self.next_fire.saturating_duration_since(now)
    }

    pub fn refractory_remaining(&self, now: Instant) -> Duration {
        self.refractory.remaining(now)
    }
}
