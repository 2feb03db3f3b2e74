//! Event dispatch and pipeline assembly
//!
//! ```text
//!  sensor drivers ──► probes ──► batches ──► output sinks
//!                       │           └──────► storage
//!                       ▼
//!                 IncomingData ─┐
//!  periodic tick ───────────────┼──► Dispatcher ──► triggers ──► commands
//!  config watcher / commands ───┘         └──────► models ─────► predictions
//! ```
//!
//! Everything the dispatcher reacts to arrives as a [`WakeEvent`] on one
//! channel. Probes, the config watcher and the stdin feed only ever hold
//! the sending half.

mod assembly;
pub mod dispatcher;
pub mod feed;

pub use assembly::{build_probes, DeviceInputs};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use feed::{FeedError, FeedLine, StdinFeed};

use crate::commands::Command;
use crate::types::DataEvent;

/// Wake-up reasons for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WakeEvent {
    /// Evaluate time-based triggers now
    PeriodicCheck,
    /// A probe produced data
    IncomingData(DataEvent),
    /// Re-read the configuration file and refresh every component
    ReloadConfiguration,
    /// An ad-hoc command from outside
    Command(Command),
}
