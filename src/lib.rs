//! Probe Relay: on-device sensing pipeline
//!
//! Probes turn raw sensor callbacks into thresholded, timestamp-reconciled
//! batches that are transmitted and persisted. A dispatcher evaluates
//! triggers on periodic ticks and incoming data, and offers the latest
//! readings to remotely defined prediction models.
//!
//! ## Architecture
//!
//! - **Acquisition**: sample sources, threshold filter, clock reconciliation, flush buffer
//! - **Probes**: continuous, application-launch and composite probe families
//! - **Triggers**: time and data conditions issuing commands
//! - **Models**: fetched, cached and compiled model definitions with throttled predictions
//! - **Pipeline**: the dispatcher loop, probe assembly and the JSON-lines feed

pub mod acquisition;
pub mod commands;
pub mod config;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod probes;
pub mod storage;
pub mod triggers;
pub mod types;
pub mod workers;

// Re-export configuration
pub use config::{ConfigSnapshot, ConfigStore, PipelineConfig};

// Re-export commonly used types
pub use types::{Batch, DataEvent, Record, Sample, SensorDescriptor, Value};

// Re-export runtime components
pub use commands::{Actuator, Command, RawCommand};
pub use models::{ModelRegistry, TrainedModel};
pub use output::OutputSink;
pub use pipeline::{Dispatcher, WakeEvent};
pub use probes::{Probe, ProbeSet};
pub use storage::{SledStorage, Storage, StorageError};
pub use triggers::TriggerEngine;
pub use workers::WorkerPool;
