//! Output sinks
//!
//! Probes and models hand finished payloads to an [`OutputSink`]. Sinks own
//! buffering, routing and retries; `transmit` never blocks the caller and
//! reports nothing back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{Record, Value};

/// One payload leaving the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub source: String,
    pub payload: Record,
}

pub trait OutputSink: Send + Sync {
    fn transmit(&self, source: &str, payload: Record);
}

/// Forwards every payload into an unbounded channel for a consumer task.
#[derive(Clone)]
pub struct ChannelOutput {
    tx: mpsc::UnboundedSender<Transmission>,
}

impl ChannelOutput {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transmission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelOutput {
    fn transmit(&self, source: &str, payload: Record) {
        let transmission = Transmission {
            source: source.to_string(),
            payload,
        };
        if self.tx.send(transmission).is_err() {
            warn!(source = %source, "Output consumer gone, payload dropped");
        }
    }
}

/// Writes a one-line summary of every payload to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl OutputSink for LogOutput {
    fn transmit(&self, source: &str, payload: Record) {
        let json = Value::Record(payload).to_json();
        info!(source = %source, payload = %json, "Transmitted");
    }
}

/// Sends every payload to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OutputSink for FanOut {
    fn transmit(&self, source: &str, payload: Record) {
        let Some((last, rest)) = self.sinks.split_last() else {
            debug!(source = %source, "No output sinks configured");
            return;
        };
        for sink in rest {
            sink.transmit(source, payload.clone());
        }
        last.transmit(source, payload);
    }
}
