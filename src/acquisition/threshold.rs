//! Per-probe noise threshold
//!
//! A sample is buffered only when it differs from the last accepted sample
//! by at least the configured threshold. The threshold itself is looked up
//! from configuration at most once per refresh interval.

use std::time::{Duration, Instant};

use crate::config::defaults::THRESHOLD_REFRESH_INTERVAL;

/// Stateful threshold filter owned by one probe.
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    threshold: f64,
    last_lookup: Option<Instant>,
    refresh_interval: Duration,
    /// `None` until the first sample, which therefore always passes
    last_accepted: Option<f64>,
}

impl ThresholdFilter {
    pub fn new(initial_threshold: f64) -> Self {
        Self::with_refresh_interval(initial_threshold, THRESHOLD_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(initial_threshold: f64, refresh_interval: Duration) -> Self {
        Self {
            threshold: initial_threshold,
            last_lookup: None,
            refresh_interval,
            last_accepted: None,
        }
    }

    /// Decide whether `value` should be buffered.
    ///
    /// `lookup` is called to re-read the threshold only when the cached value
    /// is older than the refresh interval. Non-finite readings never pass and
    /// leave the last accepted value untouched.
    pub fn passes(&mut self, value: f64, now: Instant, lookup: impl FnOnce() -> f64) -> bool {
        let stale = self
            .last_lookup
            .map_or(true, |at| now.saturating_duration_since(at) > self.refresh_interval);
        if stale {
            self.threshold = lookup();
            self.last_lookup = Some(now);
        }

        if !value.is_finite() {
            return false;
        }

        let passes = match self.last_accepted {
            None => true,
            Some(last) => (value - last).abs() >= self.threshold,
        };

        if passes {
            self.last_accepted = Some(value);
        }
        passes
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_accepted(&self) -> Option<f64> {
        self.last_accepted
    }

    /// Forget the cached threshold so the next sample re-reads it.
    pub fn invalidate(&mut self) {
        self.last_lookup = None;
    }
}
