//! Probes
//!
//! A probe owns one signal's lifecycle. Three families share the same
//! capability trait: continuous numeric probes (threshold, reconcile,
//! buffer, flush), the identity-change probe tracking the foreground
//! application, and composite probes gating a group of members.
//!
//! `refresh` is the only state transition driver. It is handed the active
//! configuration snapshot and leaves the probe either fully enabled or
//! fully disabled.

pub mod app_launch;
pub mod channels;
pub mod composite;
pub mod continuous;

pub use app_launch::{
    AppLaunchProbe, CategoryLookup, CategoryTable, ForegroundApp, ForegroundMonitor,
    ReportedForeground,
};
pub use channels::{pressure_altitude, ChannelSpec, Derivation};
pub use composite::CompositeProbe;
pub use continuous::ContinuousProbe;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::acquisition::{Clock, SamplingRate};
use crate::config::ConfigSnapshot;
use crate::output::OutputSink;
use crate::pipeline::WakeEvent;
use crate::storage::Storage;
use crate::workers::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Disabled,
    /// Held while a refresh registers the source. `state()` waits on the
    /// same lock, so readers only ever see the outcome.
    Enabling,
    Enabled,
    /// No matching sensor; the probe stays off until one appears
    Unavailable,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Effective settings of a probe, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfiguration {
    pub name: String,
    pub state: ProbeState,
    pub frequency: Option<SamplingRate>,
    pub threshold: Option<f64>,
    pub interval_ms: Option<u64>,
}

/// Collaborators every probe talks to.
#[derive(Clone)]
pub struct ProbeContext {
    pub output: Arc<dyn OutputSink>,
    pub storage: Arc<dyn Storage>,
    pub workers: WorkerPool,
    /// Incoming-data events for the dispatcher
    pub events: mpsc::UnboundedSender<WakeEvent>,
    pub clock: Arc<dyn Clock>,
}

pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// Apply `config`. Returns whether the probe ended up enabled.
    fn refresh(&self, config: &Arc<ConfigSnapshot>) -> bool;

    /// Turn the probe off regardless of configuration.
    fn shutdown(&self);

    fn state(&self) -> ProbeState;

    fn configuration(&self) -> ProbeConfiguration;
}

/// The fixed set of probes of one device.
#[derive(Default, Clone)]
pub struct ProbeSet {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, probe: Arc<dyn Probe>) {
        self.probes.push(probe);
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Probe>> {
        self.probes.iter().find(|p| p.name() == name)
    }

    /// Refresh every probe; returns how many are enabled afterwards.
    pub fn refresh_all(&self, config: &Arc<ConfigSnapshot>) -> usize {
        self.probes.iter().filter(|p| p.refresh(config)).count()
    }

    pub fn shutdown_all(&self) {
        for probe in &self.probes {
            probe.shutdown();
        }
    }

    pub fn configurations(&self) -> Vec<ProbeConfiguration> {
        self.probes.iter().map(|p| p.configuration()).collect()
    }
}
