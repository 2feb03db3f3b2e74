//! Symbolic sampling rates
//!
//! Sources accept one of four nominal rates. Configuration may name the rate
//! (`"ui"`) or use the legacy numeric code (`2`, or `"2"`). Anything else
//! falls back to [`SamplingRate::Game`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingRate {
    Fastest,
    #[default]
    Game,
    Ui,
    Normal,
}

impl SamplingRate {
    /// Nominal delay between samples the source is asked for.
    pub fn interval(self) -> Duration {
        match self {
            Self::Fastest => Duration::ZERO,
            Self::Game => Duration::from_millis(20),
            Self::Ui => Duration::from_millis(66),
            Self::Normal => Duration::from_millis(200),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Fastest => 0,
            Self::Game => 1,
            Self::Ui => 2,
            Self::Normal => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Fastest),
            1 => Some(Self::Game),
            2 => Some(Self::Ui),
            3 => Some(Self::Normal),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Ok(code) = name.parse::<i64>() {
            return Self::from_code(code);
        }
        match name.to_ascii_lowercase().as_str() {
            "fastest" => Some(Self::Fastest),
            "game" => Some(Self::Game),
            "ui" => Some(Self::Ui),
            "normal" => Some(Self::Normal),
            _ => None,
        }
    }

    /// Resolve a configured value, falling back to the default rate for
    /// anything unrecognised. `None` (not configured) is the default silently.
    pub fn resolve(probe: &str, value: Option<&toml::Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        let parsed = match value {
            toml::Value::String(s) => Self::from_name(s),
            toml::Value::Integer(i) => Self::from_code(*i),
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            warn!(probe = %probe, value = %value, fallback = %Self::default(), "Unrecognised sampling rate");
            Self::default()
        })
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fastest => "fastest",
            Self::Game => "game",
            Self::Ui => "ui",
            Self::Normal => "normal",
        };
        f.write_str(name)
    }
}
