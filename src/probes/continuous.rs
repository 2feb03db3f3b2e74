//! Continuous numeric probe
//!
//! Per sample: threshold filter, clock reconciliation, derived fields,
//! buffer push. A full buffer becomes a batch that a background job
//! transmits first and then persists row by row, so the sampling callback
//! never waits on I/O and a storage failure never holds back transmission.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use super::{ChannelSpec, Probe, ProbeConfiguration, ProbeContext, ProbeState};
use crate::acquisition::clock::nanos_to_millis;
use crate::acquisition::{
    reconcile, FlushController, SampleListener, SampleSource, SamplingRate, ThresholdFilter,
};
use crate::config::defaults::{DEFAULT_THRESHOLD, PROBE_BUFFER_CAPACITY};
use crate::config::ConfigSnapshot;
use crate::pipeline::WakeEvent;
use crate::storage::Schema;
use crate::types::{Batch, BufferedSample, DataEvent, ReconciledSample, Sample, SensorDescriptor};

struct Lifecycle {
    state: ProbeState,
    rate: Option<SamplingRate>,
}

/// Single-writer state: everything a push touches.
struct Core {
    filter: ThresholdFilter,
    buffer: FlushController,
    descriptor: Option<SensorDescriptor>,
}

struct Shared {
    spec: ChannelSpec,
    schema: Schema,
    source: Arc<dyn SampleSource>,
    ctx: ProbeContext,
    config: ArcSwap<ConfigSnapshot>,
    core: Mutex<Core>,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Filter, reconcile and buffer one sample. Returns a batch when the
    /// buffer filled.
    fn accept(&self, sample: Sample) -> Option<Batch> {
        let Some(primary) = sample.primary() else {
            debug!(probe = %self.spec.name, "Sample without values ignored");
            return None;
        };

        let now_wall = self.ctx.clock.wall_ns();
        let now_monotonic = self.ctx.clock.monotonic_ns();

        let mut core = self.lock_core();
        let threshold_key = self.spec.threshold_key();
        let passes = core.filter.passes(primary, Instant::now(), || {
            self.config.load().get_f64(&threshold_key, DEFAULT_THRESHOLD)
        });
        if !passes {
            return None;
        }

        let wall_ns = reconcile(sample.sensor_timestamp, now_wall, now_monotonic);
        let fields = self.spec.derive(&sample.values);
        let buffered = BufferedSample {
            reconciled: ReconciledSample {
                sample,
                wall_timestamp_ms: nanos_to_millis(wall_ns),
            },
            fields,
        };

        let Core { buffer, descriptor, .. } = &mut *core;
        buffer.push(buffered, descriptor.as_ref()?, nanos_to_millis(now_wall) / 1000.0)
    }

    /// Hand a batch to the worker pool: transmit, persist, announce.
    fn flush(&self, batch: Batch) {
        let probe = self.spec.name.clone();
        let table = self.spec.table.clone();
        let schema = self.schema.clone();
        let output = Arc::clone(&self.ctx.output);
        let storage = Arc::clone(&self.ctx.storage);
        let events = self.ctx.events.clone();

        debug!(probe = %probe, samples = batch.len(), "Buffer flushed");
        self.ctx.workers.submit("probe-flush", async move {
            output.transmit(&probe, batch.to_record());

            let mut failed = 0usize;
            for row in batch.rows() {
                if let Err(e) = storage.insert_row(&table, &schema, &row) {
                    failed += 1;
                    warn!(probe = %probe, error = %e, "Failed to persist probe row");
                }
            }
            if failed > 0 {
                warn!(probe = %probe, failed, total = batch.len(), "Batch partially persisted");
            }

            let event = DataEvent {
                source: probe,
                timestamp: batch.timestamp,
                values: batch.latest_fields(),
            };
            if events.send(WakeEvent::IncomingData(event)).is_err() {
                debug!("Dispatcher gone, incoming-data event dropped");
            }
        });
    }
}

impl SampleListener for Shared {
    fn on_sample(&self, sample: Sample) {
        if let Some(batch) = self.accept(sample) {
            self.flush(batch);
        }
    }
}

pub struct ContinuousProbe {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl ContinuousProbe {
    pub fn new(spec: ChannelSpec, source: Arc<dyn SampleSource>, ctx: ProbeContext) -> Self {
        Self::with_capacity(spec, source, ctx, PROBE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(
        spec: ChannelSpec,
        source: Arc<dyn SampleSource>,
        ctx: ProbeContext,
        capacity: usize,
    ) -> Self {
        let buffer = FlushController::new(spec.name.clone(), spec.fields.clone(), capacity);
        let shared = Shared {
            schema: spec.schema(),
            spec,
            source,
            ctx,
            config: ArcSwap::from_pointee(ConfigSnapshot::default()),
            core: Mutex::new(Core {
                filter: ThresholdFilter::new(DEFAULT_THRESHOLD),
                buffer,
                descriptor: None,
            }),
        };
        Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle {
                state: ProbeState::Disabled,
                rate: None,
            }),
        }
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.shared.spec
    }

    /// Samples waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.shared.lock_core().buffer.index()
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn disable(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.state == ProbeState::Enabled {
            self.shared.source.unregister();
            info!(probe = %self.shared.spec.name, "Probe disabled");
        }
        lifecycle.state = ProbeState::Disabled;
        lifecycle.rate = None;
    }

    fn enable(&self, lifecycle: &mut Lifecycle, rate: SamplingRate) -> bool {
        let name = &self.shared.spec.name;
        let Some(descriptor) = self.shared.source.descriptor() else {
            warn!(probe = %name, "No sensor available, probe stays off");
            lifecycle.state = ProbeState::Unavailable;
            return false;
        };

        lifecycle.state = ProbeState::Enabling;
        self.shared.lock_core().descriptor = Some(descriptor);

        let listener: Arc<dyn SampleListener> = Arc::clone(&self.shared) as Arc<dyn SampleListener>;
        match self.shared.source.register(rate, listener) {
            Ok(()) => {
                lifecycle.state = ProbeState::Enabled;
                lifecycle.rate = Some(rate);
                info!(
                    probe = %name,
                    rate = %rate,
                    interval_ms = rate.interval().as_millis(),
                    "Probe enabled"
                );
                true
            }
            Err(e) => {
                warn!(probe = %name, error = %e, "Sensor registration failed");
                lifecycle.state = ProbeState::Unavailable;
                lifecycle.rate = None;
                false
            }
        }
    }
}

impl Probe for ContinuousProbe {
    fn name(&self) -> &str {
        &self.shared.spec.name
    }

    fn refresh(&self, config: &Arc<ConfigSnapshot>) -> bool {
        let spec = &self.shared.spec;
        self.shared.config.store(Arc::clone(config));
        self.shared.lock_core().filter.invalidate();

        let enabled = config.get_bool(&spec.enabled_key(), false);
        let rate = SamplingRate::resolve(&spec.name, config.get_value(&spec.frequency_key()));

        let mut lifecycle = self.lock_lifecycle();
        if !enabled {
            self.disable(&mut lifecycle);
            return false;
        }

        if lifecycle.state == ProbeState::Enabled {
            if lifecycle.rate == Some(rate) {
                return true;
            }
            // Rate changes only take effect through re-registration
            info!(probe = %spec.name, rate = %rate, "Sampling rate changed, re-registering");
            self.disable(&mut lifecycle);
        }

        self.enable(&mut lifecycle, rate)
    }

    fn shutdown(&self) {
        let mut lifecycle = self.lock_lifecycle();
        self.disable(&mut lifecycle);
    }

    fn state(&self) -> ProbeState {
        self.lock_lifecycle().state
    }

    fn configuration(&self) -> ProbeConfiguration {
        let lifecycle = self.lock_lifecycle();
        ProbeConfiguration {
            name: self.shared.spec.name.clone(),
            state: lifecycle.state,
            frequency: lifecycle.rate,
            threshold: Some(self.shared.lock_core().filter.threshold()),
            interval_ms: None,
        }
    }
}
