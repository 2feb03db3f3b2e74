//! Sensor clock to wall clock reconciliation
//!
//! Most sensors stamp readings with nanoseconds since boot. The offset
//! between the wall clock and the monotonic clock, taken at the moment the
//! reading is handled, converts that into wall-clock time. Some drivers
//! already stamp wall-clock nanoseconds; adding the offset to those lands
//! far in the future, which the sanity check catches.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::defaults::WALL_CLOCK_SANITY_FACTOR;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Convert a sensor timestamp (ns) into wall-clock nanoseconds.
///
/// `now_wall_ns` is the current wall-clock time, `now_monotonic_ns` the
/// current reading of the clock the sensor stamps with. When the result
/// exceeds `now_wall_ns * 1.1` the sensor is assumed to report wall-clock
/// time already and `sensor_ts` is returned unchanged.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn reconcile(sensor_ts: u64, now_wall_ns: u64, now_monotonic_ns: u64) -> u64 {
    let offset = i128::from(now_wall_ns) - i128::from(now_monotonic_ns);
    let candidate = i128::from(sensor_ts) + offset;

    if candidate as f64 > now_wall_ns as f64 * WALL_CLOCK_SANITY_FACTOR {
        return sensor_ts;
    }

    candidate.clamp(0, i128::from(u64::MAX)) as u64
}

/// Wall-clock nanoseconds converted to fractional milliseconds.
#[allow(clippy::cast_precision_loss)]
pub fn nanos_to_millis(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_MILLI
}

/// Source of "now" for both clocks, so reconciliation can be driven by
/// fixed values in tests.
pub trait Clock: Send + Sync {
    /// Wall-clock nanoseconds since the Unix epoch.
    fn wall_ns(&self) -> u64;
    /// Nanoseconds on the clock sensors stamp readings with.
    fn monotonic_ns(&self) -> u64;
}

/// Real clocks: `SystemTime` for wall time, process-relative `Instant` for
/// the monotonic side.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn wall_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn monotonic_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// A clock frozen at fixed readings.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub wall_ns: u64,
    pub monotonic_ns: u64,
}

impl Clock for FixedClock {
    fn wall_ns(&self) -> u64 {
        self.wall_ns
    }

    fn monotonic_ns(&self) -> u64 {
        self.monotonic_ns
    }
}
