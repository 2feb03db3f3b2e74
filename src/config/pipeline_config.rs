//! Pipeline configuration document
//!
//! One TOML document describes the device, storage location, dispatcher
//! cadence, per-probe settings, the trigger set and the trained models.
//! Every struct implements `Default`, so a missing file or a missing table
//! yields the built-in behaviour.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{
    DEFAULT_DATA_DIR, DEFAULT_MAX_CONCURRENT_JOBS, MODELS_DIR_NAME, PERIODIC_CHECK_INTERVAL_SECS,
};
use crate::models::ModelDefinition;
use crate::triggers::TriggerDefinition;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "PROBE_RELAY_CONFIG";

/// File looked up in the working directory when the env var is unset.
pub const LOCAL_CONFIG_FILE: &str = "probe_relay.toml";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Config parse error: {0}")]
    ParseInline(#[from] toml::de::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("No configuration file to reload")]
    NoSource,
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub device: DeviceInfo,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    /// Per-probe settings keyed by probe name
    #[serde(default)]
    pub probes: BTreeMap<String, ProbeSettings>,

    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,

    #[serde(default)]
    pub models: Vec<ModelDefinition>,

    /// Package name to application category, for the application-launch probe
    #[serde(default)]
    pub app_categories: BTreeMap<String, String>,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Locate the configuration file:
    /// 1. `$PROBE_RELAY_CONFIG`
    /// 2. `./probe_relay.toml`
    ///
    /// Returns `None` when neither exists (built-in defaults apply).
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Some(p);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        None
    }

    /// Validate cross-field constraints, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.dispatcher.periodic_check_secs == 0 {
            errors.push("dispatcher.periodic_check_secs must be > 0".to_string());
        }
        if self.workers.max_concurrent == 0 {
            errors.push("workers.max_concurrent must be > 0".to_string());
        }

        let mut trigger_ids = HashSet::new();
        for trigger in &self.triggers {
            if trigger.id.trim().is_empty() {
                errors.push("trigger with empty id".to_string());
            } else if !trigger_ids.insert(trigger.id.as_str()) {
                errors.push(format!("duplicate trigger id '{}'", trigger.id));
            }
        }

        let mut model_uris = HashSet::new();
        for model in &self.models {
            if model.uri.trim().is_empty() {
                errors.push("model with empty uri".to_string());
            } else if !model_uris.insert(model.uri.as_str()) {
                errors.push(format!("duplicate model uri '{}'", model.uri));
            }
        }

        for (name, probe) in &self.probes {
            if probe.buffer_capacity == Some(0) {
                errors.push(format!("probes.{name}.buffer_capacity must be > 0"));
            }
            if probe.interval_ms == Some(0) {
                errors.push(format!("probes.{name}.interval_ms must be > 0"));
            }
            for member in &probe.members {
                if member == name {
                    errors.push(format!("probes.{name} lists itself as a member"));
                } else if !self.probes.contains_key(member) {
                    errors.push(format!("probes.{name} member '{member}' has no [probes.{member}] table"));
                }
            }
            if let Some(threshold) = probe.threshold {
                if !threshold.is_finite() || threshold < 0.0 {
                    errors.push(format!("probes.{name}.threshold must be a finite value >= 0"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "unnamed-device".to_string()
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Internal data directory (probe database, model cache)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep cached models on externally-backed storage
    #[serde(default)]
    pub external: bool,

    /// Externally-backed directory used when `external` is set
    #[serde(default)]
    pub external_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            external: false,
            external_dir: None,
        }
    }
}

impl StorageConfig {
    /// Directory holding cached model definitions.
    pub fn models_dir(&self) -> PathBuf {
        let root = match (&self.external_dir, self.external) {
            (Some(dir), true) => dir.clone(),
            (None, true) => {
                warn!("storage.external set without storage.external_dir, using data_dir");
                self.data_dir.clone()
            }
            _ => self.data_dir.clone(),
        };
        root.join(MODELS_DIR_NAME)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_periodic_check_secs")]
    pub periodic_check_secs: u64,
}

fn default_periodic_check_secs() -> u64 {
    PERIODIC_CHECK_INTERVAL_SECS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            periodic_check_secs: default_periodic_check_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Settings shared by every probe family. Unused fields are ignored by
/// families that have no use for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub enabled: bool,

    /// Symbolic sampling rate (`fastest`, `game`, `ui`, `normal`) or legacy code
    #[serde(default)]
    pub frequency: Option<toml::Value>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub threshold: Option<f64>,

    /// Polling interval for polled probes (milliseconds)
    #[serde(default)]
    pub interval_ms: Option<u64>,

    /// Samples buffered before a flush (continuous probes)
    #[serde(default)]
    pub buffer_capacity: Option<usize>,

    /// Member probes gated by this group's `enabled` flag
    #[serde(default)]
    pub members: Vec<String>,
}

/// Preference-style documents often store flags and numbers as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Typed(T),
    Text(String),
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Lenient::<bool>::deserialize(deserializer)? {
        Lenient::Typed(b) => Ok(b),
        Lenient::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Lenient::<f64>::deserialize(deserializer)? {
        Lenient::Typed(v) => Ok(Some(v)),
        Lenient::Text(s) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}
