//! Per-model prediction throttle
//!
//! Throttle-drop: a call inside the window is discarded, never deferred,
//! and still moves the window forward. A steady stream of calls spaced
//! closer than the window therefore evaluates once and then stays silent.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PredictionThrottle {
    window: Duration,
    last_call: Option<Instant>,
}

impl PredictionThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_call: None,
        }
    }

    /// Record a call at `now`; `true` when it may evaluate.
    pub fn admit(&mut self, now: Instant) -> bool {
        let admitted = self
            .last_call
            .map_or(true, |last| now.saturating_duration_since(last) >= self.window);
        self.last_call = Some(now);
        admitted
    }
}
