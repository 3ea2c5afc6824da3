//! Action dispatch contract and notification throttling

use crate::types::short_id;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Length of the notification throttle window
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(3600);

/// Fires the actions configured for a conditional
///
/// Fire-and-forget: implementations must not block the caller and own their
/// failures. The controller never awaits or retries a dispatch.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, rule_id: &str, message: &str);

    /// Drop any per-rule state, called when a conditional is refreshed
    fn reset(&self, _rule_id: &str) {}
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    sent: u32,
}

/// Hourly notification cap per conditional
///
/// The window opens at the first notification and lasts one hour. A cap of
/// zero suppresses every notification.
#[derive(Debug)]
pub struct NotificationThrottle {
    hourly_max: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl NotificationThrottle {
    pub fn new(hourly_max: u32) -> Self {
        Self {
            hourly_max,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn hourly_max(&self) -> u32 {
        self.hourly_max
    }

    /// Count a notification for `rule_id`, returning false when over the cap
    pub fn allow(&self, rule_id: &str, now: Instant) -> bool {
        if self.hourly_max == 0 {
            return false;
        }

        let mut windows = self.windows.lock();
        let window = windows.entry(rule_id.to_string()).or_insert(Window {
            started: now,
            sent: 0,
        });

        if now.duration_since(window.started) >= THROTTLE_WINDOW {
            *window = Window {
                started: now,
                sent: 0,
            };
        }

        if window.sent >= self.hourly_max {
            return false;
        }
        window.sent += 1;
        true
    }

    /// Notifications left in the current window
    pub fn remaining(&self, rule_id: &str, now: Instant) -> u32 {
        let windows = self.windows.lock();
        match windows.get(rule_id) {
            Some(w) if now.duration_since(w.started) < THROTTLE_WINDOW => {
                self.hourly_max.saturating_sub(w.sent)
            },
            _ => self.hourly_max,
        }
    }

    pub fn reset(&self, rule_id: &str) {
        self.windows.lock().remove(rule_id);
    }
}

/// Dispatcher wrapper applying a [`NotificationThrottle`]
pub struct ThrottledDispatcher {
    inner: Arc<dyn ActionDispatcher>,
    throttle: NotificationThrottle,
}

impl ThrottledDispatcher {
    pub fn new(inner: Arc<dyn ActionDispatcher>, hourly_max: u32) -> Self {
        Self {
            inner,
            throttle: NotificationThrottle::new(hourly_max),
        }
    }

    pub fn throttle(&self) -> &NotificationThrottle {
        &self.throttle
    }
}

impl ActionDispatcher for ThrottledDispatcher {
    fn dispatch(&self, rule_id: &str, message: &str) {
        if self.throttle.allow(rule_id, Instant::now()) {
            self.inner.dispatch(rule_id, message);
        } else {
            warn!(
                "Conditional {}: hourly notification limit ({}) reached, trigger suppressed",
                short_id(rule_id),
                self.throttle.hourly_max()
            );
        }
    }

    fn reset(&self, rule_id: &str) {
        self.throttle.reset(rule_id);
        self.inner.reset(rule_id);
    }
}
