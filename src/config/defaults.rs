//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

use std::time::Duration;

// ============================================================================
// Probes
// ============================================================================

/// Samples held by a continuous probe before a flush.
pub const PROBE_BUFFER_CAPACITY: usize = 512;

/// How long a threshold read from configuration stays cached.
pub const THRESHOLD_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum change between accepted samples when no threshold is configured.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Reconciled timestamps beyond `now * factor` are treated as already wall-clock.
pub const WALL_CLOCK_SANITY_FACTOR: f64 = 1.1;

/// Default polling interval for the application-launch probe (milliseconds).
pub const APP_LAUNCH_INTERVAL_MS: u64 = 10_000;

/// Label reported when an application's display name cannot be resolved.
pub const UNKNOWN_APP_LABEL: &str = "???";

/// Category reported when an application's category cannot be resolved.
pub const UNKNOWN_APP_CATEGORY: &str = "Unknown";

/// Name of the identity-change probe tracking the foreground application.
pub const APP_LAUNCH_PROBE: &str = "application_launch";

/// Standard atmosphere at sea level (hPa), reference for altitude derivation.
pub const PRESSURE_STANDARD_ATMOSPHERE: f64 = 1013.25;

// ============================================================================
// Models
// ============================================================================

/// Minimum spacing between prediction attempts of a single model.
pub const PREDICTION_THROTTLE: Duration = Duration::from_millis(1000);

/// Directory (below the data directory) holding cached model definitions.
pub const MODELS_DIR_NAME: &str = "persisted_models";

/// HTTP timeout for model definition fetches (seconds).
pub const MODEL_FETCH_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Dispatcher / workers
// ============================================================================

/// Cadence of the periodic trigger check (seconds).
pub const PERIODIC_CHECK_INTERVAL_SECS: u64 = 60;

/// Background jobs allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;

// ============================================================================
// Storage
// ============================================================================

/// Default data directory path.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Sled database directory name inside the data directory.
pub const PROBE_DB_NAME: &str = "probe_values.db";

// ============================================================================
// Config watcher
// ============================================================================

/// Interval between config file mtime checks.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debounce delay after detecting a change (editors often write in stages).
pub const CONFIG_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);
