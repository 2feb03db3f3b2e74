//! Ad-hoc commands
//!
//! Commands reach the pipeline from two places: external wake events
//! (a named action plus string extras) and trigger actions in the
//! configuration. Both are decoded once into [`Command`]; nothing
//! downstream matches on action strings.

pub mod actuator;

pub use actuator::{Actuator, ActuatorError, LoggingActuator, RecordingActuator};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix every haptic pattern name carries.
pub const HAPTIC_PREFIX: &str = "vibrator_";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command action '{0}'")]
    UnknownAction(String),

    #[error("Command '{action}' is missing required field '{field}'")]
    MissingField { action: String, field: &'static str },
}

// ============================================================================
// Haptic patterns
// ============================================================================

/// Named vibration pattern. Unrecognised names play the default buzz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HapticPattern {
    #[default]
    Buzz,
    Blip,
    Sos,
}

impl HapticPattern {
    /// Resolve a pattern name with or without the `vibrator_` prefix.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        let bare = name.strip_prefix(HAPTIC_PREFIX).unwrap_or(&name);
        match bare {
            "blip" => Self::Blip,
            "sos" => Self::Sos,
            _ => Self::Buzz,
        }
    }

    /// Fully qualified name, e.g. `vibrator_sos`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Buzz => "vibrator_buzz",
            Self::Blip => "vibrator_blip",
            Self::Sos => "vibrator_sos",
        }
    }

    /// Alternating off/on durations in milliseconds, starting with a delay.
    pub fn timings_ms(self) -> &'static [u64] {
        match self {
            Self::Buzz => &[0, 500],
            Self::Blip => &[0, 100],
            Self::Sos => &[
                0, 100, 100, 100, 100, 100, 300, 300, 300, 300, 300, 300, 100, 100, 100, 100,
                100,
            ],
        }
    }
}

impl From<String> for HapticPattern {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<HapticPattern> for String {
    fn from(pattern: HapticPattern) -> Self {
        pattern.name().to_string()
    }
}

impl fmt::Display for HapticPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Command
// ============================================================================

/// Everything the pipeline can be asked to do outside of sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Play a haptic pattern.
    #[serde(rename = "haptic_pattern")]
    Vibrate {
        #[serde(default)]
        pattern: HapticPattern,
    },

    /// Play a notification tone by title, or the default tone.
    #[serde(rename = "ringtone")]
    PlayTone {
        #[serde(default)]
        name: Option<String>,
    },

    /// Launch an application with string parameters, then run an
    /// optional follow-up script.
    #[serde(rename = "application_launch")]
    LaunchApplication {
        package: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        postscript: Option<String>,
    },

    /// Re-read the configuration and refresh every component.
    #[serde(rename = "refresh_configuration")]
    ReloadConfiguration,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Vibrate { .. } => "haptic_pattern",
            Self::PlayTone { .. } => "ringtone",
            Self::LaunchApplication { .. } => "application_launch",
            Self::ReloadConfiguration => "refresh_configuration",
        }
    }
}

/// A command as it arrives from outside: an action name and string extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    pub action: String,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl RawCommand {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extras: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Decode into a typed command. Action names are case-insensitive.
    pub fn decode(&self) -> Result<Command, CommandError> {
        let action = self.action.trim().to_ascii_lowercase();
        match action.as_str() {
            "haptic_pattern" => Ok(Command::Vibrate {
                pattern: self
                    .extras
                    .get("pattern")
                    .map(|p| HapticPattern::from_name(p))
                    .unwrap_or_default(),
            }),
            "ringtone" => Ok(Command::PlayTone {
                name: self.extras.get("name").cloned(),
            }),
            "application_launch" => {
                let package = self
                    .extras
                    .get("package")
                    .cloned()
                    .ok_or_else(|| CommandError::MissingField {
                        action: action.clone(),
                        field: "package",
                    })?;
                let parameters = self
                    .extras
                    .get("parameters")
                    .map(|json| parse_parameters(&package, json))
                    .unwrap_or_default();
                Ok(Command::LaunchApplication {
                    package,
                    parameters,
                    postscript: self.extras.get("postscript").cloned(),
                })
            }
            "refresh_configuration" => Ok(Command::ReloadConfiguration),
            _ => Err(CommandError::UnknownAction(self.action.clone())),
        }
    }
}

/// Parse a JSON object of launch parameters. Non-string values are kept in
/// their JSON text form. A malformed object is logged and launches without
/// parameters.
fn parse_parameters(package: &str, json: &str) -> BTreeMap<String, String> {
    let object: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(json) {
        Ok(object) => object,
        Err(e) => {
            warn!(package = %package, error = %e, "Launch parameters are not a JSON object, launching without them");
            return BTreeMap::new();
        }
    };
    object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}
