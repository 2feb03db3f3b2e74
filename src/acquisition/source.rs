//! Sample source abstraction
//!
//! A source wraps one physical or virtual sensor. Probes register a listener
//! at a sampling rate and the source calls it back on its own schedule, from
//! whatever thread its driver uses. The only way to change the rate is to
//! unregister and register again.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::SamplingRate;
use crate::types::{Sample, SensorDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("No sensor available for source '{0}'")]
    Unavailable(String),

    #[error("Source '{0}' already has a registered listener")]
    AlreadyRegistered(String),

    #[error("Driver rejected registration: {0}")]
    Driver(String),
}

/// Receiver of raw samples. Called from the source's delivery context, so
/// implementations must not block.
pub trait SampleListener: Send + Sync {
    fn on_sample(&self, sample: Sample);
}

/// A sensor that can be attached to and detached from.
pub trait SampleSource: Send + Sync {
    /// Metadata of the backing sensor, `None` when no hardware matches.
    fn descriptor(&self) -> Option<SensorDescriptor>;

    fn register(
        &self,
        rate: SamplingRate,
        listener: Arc<dyn SampleListener>,
    ) -> Result<(), SourceError>;

    /// Detach the listener. Unregistering an idle source is a no-op.
    fn unregister(&self);
}

// ============================================================================
// Channel-fed source
// ============================================================================

#[derive(Default)]
struct Registration {
    rate: Option<SamplingRate>,
    listener: Option<Arc<dyn SampleListener>>,
    registrations: u64,
}

/// A source fed programmatically: `deliver` pushes a sample to whichever
/// listener is registered. Used for the stdin feed and in tests.
pub struct ChannelSource {
    name: String,
    descriptor: Option<SensorDescriptor>,
    inner: Mutex<Registration>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>, descriptor: Option<SensorDescriptor>) -> Self {
        Self {
            name: name.into(),
            descriptor,
            inner: Mutex::new(Registration::default()),
        }
    }

    /// A source with a generic descriptor named after it.
    pub fn virtual_sensor(name: impl Into<String>) -> Self {
        let name = name.into();
        let descriptor = SensorDescriptor {
            name: format!("{name} (virtual)"),
            vendor: "probe-relay".into(),
            kind: 0,
            resolution: 0.0,
            power_ma: 0.0,
            max_range: f32::MAX,
            version: 1,
        };
        Self::new(name, Some(descriptor))
    }

    fn lock(&self) -> MutexGuard<'_, Registration> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Hand a sample to the registered listener. Returns `false` when nobody
    /// is listening and the sample was discarded.
    pub fn deliver(&self, sample: Sample) -> bool {
        // Clone out so the listener runs without our lock held.
        let listener = self.lock().listener.clone();
        match listener {
            Some(listener) => {
                listener.on_sample(sample);
                true
            }
            None => false,
        }
    }

    pub fn rate(&self) -> Option<SamplingRate> {
        self.lock().rate
    }

    pub fn is_registered(&self) -> bool {
        self.lock().listener.is_some()
    }

    /// Number of successful registrations over the source's lifetime.
    pub fn registrations(&self) -> u64 {
        self.lock().registrations
    }
}

impl SampleSource for ChannelSource {
    fn descriptor(&self) -> Option<SensorDescriptor> {
        self.descriptor.clone()
    }

    fn register(
        &self,
        rate: SamplingRate,
        listener: Arc<dyn SampleListener>,
    ) -> Result<(), SourceError> {
        if self.descriptor.is_none() {
            return Err(SourceError::Unavailable(self.name.clone()));
        }
        let mut inner = self.lock();
        if inner.listener.is_some() {
            return Err(SourceError::AlreadyRegistered(self.name.clone()));
        }
        inner.rate = Some(rate);
        inner.listener = Some(listener);
        inner.registrations += 1;
        debug!(source = %self.name, rate = %rate, "Listener registered");
        Ok(())
    }

    fn unregister(&self) {
        let mut inner = self.lock();
        if inner.listener.take().is_some() {
            debug!(source = %self.name, "Listener unregistered");
        }
        inner.rate = None;
    }
}
