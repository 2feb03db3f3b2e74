//! Command execution seam
//!
//! The dispatcher handles configuration reloads itself and passes every
//! other command to an [`Actuator`], which owns the platform side effects
//! (vibration motor, audio, application launcher, script engine).

use std::sync::Mutex;

use tracing::info;

use super::Command;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Command '{0}' is not supported on this device")]
    Unsupported(&'static str),

    #[error("Command '{action}' failed: {message}")]
    Failed {
        action: &'static str,
        message: String,
    },
}

pub trait Actuator: Send + Sync {
    fn execute(&self, command: &Command) -> Result<(), ActuatorError>;
}

/// Default actuator for headless hosts: records each command in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn execute(&self, command: &Command) -> Result<(), ActuatorError> {
        match command {
            Command::Vibrate { pattern } => {
                info!(pattern = %pattern, timings_ms = ?pattern.timings_ms(), "Haptic pattern");
            }
            Command::PlayTone { name } => {
                info!(tone = name.as_deref().unwrap_or("default"), "Notification tone");
            }
            Command::LaunchApplication {
                package,
                parameters,
                postscript,
            } => {
                info!(package = %package, parameters = ?parameters, "Application launch");
                if let Some(script) = postscript {
                    info!(package = %package, script = %script, "Launch postscript");
                }
            }
            Command::ReloadConfiguration => return Err(ActuatorError::Unsupported(command.action())),
        }
        Ok(())
    }
}

/// Actuator that remembers every command it was given.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    executed: Mutex<Vec<Command>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<Command> {
        self.executed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Actuator for RecordingActuator {
    fn execute(&self, command: &Command) -> Result<(), ActuatorError> {
        self.executed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(command.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::HapticPattern;

    #[test]
    fn logging_actuator_handles_device_commands() {
        let actuator = LoggingActuator;
        assert!(actuator
            .execute(&Command::Vibrate {
                pattern: HapticPattern::Sos
            })
            .is_ok());
        assert!(actuator.execute(&Command::PlayTone { name: None }).is_ok());
        assert!(matches!(
            actuator.execute(&Command::ReloadConfiguration),
            Err(ActuatorError::Unsupported("refresh_configuration"))
        ));
    }

    #[test]
    fn recording_actuator_keeps_order() {
        let actuator = RecordingActuator::new();
        actuator
            .execute(&Command::PlayTone {
                name: Some("chime".into()),
            })
            .expect("records");
        actuator
            .execute(&Command::Vibrate {
                pattern: HapticPattern::Buzz,
            })
            .expect("records");
        assert_eq!(actuator.executed().len(), 2);
    }
}
