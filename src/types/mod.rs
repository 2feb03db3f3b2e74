//! Shared data structures for the sensing pipeline
//!
//! - Sample / ReconciledSample / BufferedSample: what flows from a source into a probe buffer
//! - Batch: a flushed buffer, transmitted then persisted row by row
//! - DataEvent: what the dispatcher routes to triggers and models
//! - Record / Value: structured payloads handed to output sinks

mod record;
mod sample;

pub use record::*;
pub use sample::*;
