//! JSON-lines input feed
//!
//! Drives a headless device from a line-oriented stream (stdin by default):
//!
//! ```text
//! {"type":"sample","probe":"pressure","values":[1009.2]}
//! {"type":"foreground","package":"org.mail","label":"Mail"}
//! {"type":"command","action":"haptic_pattern","pattern":"sos"}
//! ```
//!
//! Malformed lines are logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeviceInputs, WakeEvent};
use crate::acquisition::Clock;
use crate::commands::{CommandError, RawCommand};
use crate::probes::{ForegroundApp, Probe, ProbeState};
use crate::types::Sample;

/// Accuracy reported for fed samples that carry none.
const FEED_DEFAULT_ACCURACY: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Malformed feed line: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No sampled probe named '{0}'")]
    UnknownProbe(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Dispatcher is no longer accepting events")]
    DispatcherGone,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedLine {
    Sample {
        probe: String,
        values: Vec<f32>,
        /// Sensor-clock nanoseconds; defaults to the monotonic clock now
        #[serde(default)]
        timestamp: Option<u64>,
        #[serde(default)]
        accuracy: Option<i32>,
    },
    Foreground {
        package: String,
        #[serde(default)]
        label: Option<String>,
    },
    Command {
        action: String,
        #[serde(flatten)]
        extras: BTreeMap<String, serde_json::Value>,
    },
}

pub struct StdinFeed<R> {
    reader: R,
    inputs: DeviceInputs,
    events: mpsc::UnboundedSender<WakeEvent>,
    clock: Arc<dyn Clock>,
}

impl StdinFeed<BufReader<Stdin>> {
    pub fn stdin(
        inputs: DeviceInputs,
        events: mpsc::UnboundedSender<WakeEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), inputs, events, clock)
    }
}

impl<R: AsyncBufRead + Unpin> StdinFeed<R> {
    pub fn new(
        reader: R,
        inputs: DeviceInputs,
        events: mpsc::UnboundedSender<WakeEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reader,
            inputs,
            events,
            clock,
        }
    }

    /// Parse and route one line.
    pub fn apply_line(&self, line: &str) -> Result<(), FeedError> {
        match serde_json::from_str::<FeedLine>(line)? {
            FeedLine::Sample {
                probe,
                values,
                timestamp,
                accuracy,
            } => {
                let source = self
                    .inputs
                    .source(&probe)
                    .ok_or_else(|| FeedError::UnknownProbe(probe.clone()))?;
                let sample = Sample::new(
                    values,
                    timestamp.unwrap_or_else(|| self.clock.monotonic_ns()),
                    accuracy.unwrap_or(FEED_DEFAULT_ACCURACY),
                );
                if !source.deliver(sample) {
                    debug!(probe = %probe, "Probe not listening, sample discarded");
                }
            }
            FeedLine::Foreground { package, label } => {
                self.inputs.foreground.report(ForegroundApp::new(package, label));
                if self.inputs.app_launch.state() == ProbeState::Enabled {
                    self.inputs.app_launch.poll_now();
                }
            }
            FeedLine::Command { action, extras } => {
                let raw = extras.into_iter().fold(RawCommand::new(action), |raw, (key, value)| {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    raw.with(key, text)
                });
                let command = raw.decode()?;
                self.events
                    .send(WakeEvent::Command(command))
                    .map_err(|_| FeedError::DispatcherGone)?;
            }
        }
        Ok(())
    }

    /// Read lines until EOF or cancellation. Returns the number of lines
    /// applied successfully.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut applied = 0u64;
        let mut line = String::with_capacity(512);
        info!("Feed started");

        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = self.reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => {
                    info!(applied, "Feed reached end of input");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Feed read failed");
                    break;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match self.apply_line(trimmed) {
                Ok(()) => applied += 1,
                Err(FeedError::DispatcherGone) => {
                    warn!("Dispatcher gone, stopping feed");
                    break;
                }
                Err(e) => warn!(error = %e, "Feed line skipped"),
            }
        }
        applied
    }
}
