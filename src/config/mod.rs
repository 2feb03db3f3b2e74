//! Pipeline Configuration Module
//!
//! Configuration is a read-mostly TOML document. Components never read a
//! process-wide global: they receive an `Arc<ConfigSnapshot>` at construction
//! or refresh time, and the [`ConfigStore`] replaces the whole snapshot on
//! reload so readers observe either the old document or the new one.
//!
//! ## Loading Order
//!
//! 1. `PROBE_RELAY_CONFIG` environment variable (path to TOML file)
//! 2. `probe_relay.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! let store = ConfigStore::load();
//! let snapshot = store.snapshot();
//! let threshold = snapshot.get_f64("probes.pressure.threshold", 0.5);
//!
//! let mut changes = store.subscribe();
//! changes.changed().await?;   // a reload happened, refresh everything
//! ```

pub mod defaults;
mod pipeline_config;
pub mod watcher;

pub use pipeline_config::*;

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

// ============================================================================
// Snapshot
// ============================================================================

/// An immutable, fully parsed configuration document.
///
/// Exposes both the structured view ([`PipelineConfig`]) and typed
/// key-value getters over dotted keys such as `probes.pressure.threshold`.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    config: PipelineConfig,
    raw: toml::Table,
    generation: u64,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            raw: toml::Table::new(),
            generation: 0,
        }
    }
}

impl ConfigSnapshot {
    /// Parse a TOML document into a snapshot.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: toml::Table = contents.parse()?;
        let config = PipelineConfig::from_toml_str(contents)?;
        Ok(Self {
            config,
            raw,
            generation: 0,
        })
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: toml::Table = contents.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = PipelineConfig::load_from_file(path)?;
        Ok(Self {
            config,
            raw,
            generation: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reload counter at the time this snapshot was installed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a dotted key in the raw document.
    pub fn get_value(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.raw.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_value(key) {
            Some(toml::Value::Boolean(b)) => *b,
            Some(toml::Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Numeric getter. Numeric strings are accepted, since preference-style
    /// documents often store numbers as text.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get_value(key) {
            Some(toml::Value::Float(f)) => *f,
            #[allow(clippy::cast_precision_loss)]
            Some(toml::Value::Integer(i)) => *i as f64,
            Some(toml::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get_value(key) {
            Some(toml::Value::Integer(i)) => *i,
            Some(toml::Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(toml::Value::as_str)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Holder of the active configuration snapshot.
///
/// Reads are lock-free; a reload swaps the whole snapshot atomically and
/// bumps the generation published on the change channel. Subscribers only
/// see the latest generation, so bursts of reloads coalesce into a single
/// "refresh everything".
pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
    source: Option<PathBuf>,
    generation: AtomicU64,
    changes: watch::Sender<u64>,
}

impl ConfigStore {
    /// Create a store around an in-memory snapshot with an optional backing file.
    pub fn new(snapshot: ConfigSnapshot, source: Option<PathBuf>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(snapshot),
            source,
            generation: AtomicU64::new(0),
            changes,
        }
    }

    /// Load using the standard search order, falling back to defaults when
    /// no file exists or the file is unusable.
    pub fn load() -> Self {
        match PipelineConfig::locate() {
            Some(path) => match ConfigSnapshot::from_file(&path) {
                Ok(snapshot) => {
                    info!(path = %path.display(), device = %snapshot.config().device.name, "Loaded pipeline config");
                    Self::new(snapshot, Some(path))
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                    Self::new(ConfigSnapshot::default(), Some(path))
                }
            },
            None => Self::new(ConfigSnapshot::default(), None),
        }
    }

    /// Open a specific file; unlike [`load`](Self::load), errors are returned.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let snapshot = ConfigSnapshot::from_file(path)?;
        Ok(Self::new(snapshot, Some(path.to_path_buf())))
    }

    /// The active snapshot. Holding the `Arc` keeps a consistent view even if
    /// a reload happens meanwhile.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Re-read the backing file and install it. On any error the previous
    /// snapshot stays active.
    pub fn reload(&self) -> Result<u64, ConfigError> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;
        match ConfigSnapshot::from_file(path) {
            Ok(snapshot) => {
                let generation = self.replace(snapshot);
                info!(path = %path.display(), generation, "Configuration reloaded");
                Ok(generation)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Config reload failed, keeping previous config");
                Err(e)
            }
        }
    }

    /// Install a new snapshot wholesale and notify subscribers.
    pub fn replace(&self, mut snapshot: ConfigSnapshot) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.generation = generation;
        self.current.store(Arc::new(snapshot));
        self.changes.send_replace(generation);
        generation
    }

    /// Subscribe to reload notifications (latest generation only).
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
        [device]
        name = "bench-phone"

        [probes.pressure]
        enabled = true
        frequency = "ui"
        threshold = 0.25

        [probes.light]
        enabled = "true"
        threshold = "1.5"
    "#;

    #[test]
    fn typed_getters_follow_dotted_keys() {
        let snapshot = ConfigSnapshot::parse(DOC).expect("parses");
        assert!(snapshot.get_bool("probes.pressure.enabled", false));
        assert!((snapshot.get_f64("probes.pressure.threshold", 0.5) - 0.25).abs() < f64::EPSILON);
        assert_eq!(snapshot.get_str("probes.pressure.frequency"), Some("ui"));
        assert!(!snapshot.get_bool("probes.missing.enabled", false));
        assert_eq!(snapshot.get_i64("dispatcher.periodic_check_secs", 60), 60);
    }

    #[test]
    fn string_values_are_coerced() {
        let snapshot = ConfigSnapshot::parse(DOC).expect("parses");
        assert!(snapshot.get_bool("probes.light.enabled", false));
        assert!((snapshot.get_f64("probes.light.threshold", 0.0) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn replace_bumps_generation_and_notifies() {
        let store = ConfigStore::new(ConfigSnapshot::default(), None);
        let rx = store.subscribe();
        let generation = store.replace(ConfigSnapshot::parse(DOC).expect("parses"));
        assert_eq!(generation, 1);
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(store.snapshot().config().device.name, "bench-phone");
        assert_eq!(store.snapshot().generation(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(DOC.as_bytes()).expect("write");
        let store = ConfigStore::open(file.path()).expect("opens");

        std::fs::write(file.path(), "[probes.pressure\nbroken").expect("overwrite");
        assert!(store.reload().is_err());
        assert_eq!(store.snapshot().config().device.name, "bench-phone");
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn reload_without_source_is_an_error() {
        let store = ConfigStore::new(ConfigSnapshot::default(), None);
        assert!(matches!(store.reload(), Err(ConfigError::NoSource)));
    }
}
