//! The dispatcher loop
//!
//! Single consumer of [`WakeEvent`]s. Periodic checks evaluate time
//! triggers only; incoming data evaluates data triggers only and offers the
//! rolling snapshot to every model. Configuration changes, whether from the
//! watcher, a command or an in-memory replace, all arrive through the
//! store's change channel and are applied in one place.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WakeEvent;
use crate::commands::{Actuator, Command};
use crate::config::{ConfigError, ConfigSnapshot, ConfigStore};
use crate::models::ModelRegistry;
use crate::output::OutputSink;
use crate::probes::ProbeSet;
use crate::triggers::{FiredTrigger, TriggerEngine};
use crate::types::{DataEvent, Record};

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub ticks: u64,
    pub data_events: u64,
    pub triggers_fired: u64,
    pub commands_executed: u64,
    pub reloads: u64,
}

pub struct Dispatcher {
    store: Arc<ConfigStore>,
    triggers: Arc<TriggerEngine>,
    models: Arc<ModelRegistry>,
    probes: ProbeSet,
    actuator: Arc<dyn Actuator>,
    output: Arc<dyn OutputSink>,
    periodic: Option<Duration>,
    /// Latest value per `"<probe>.<FIELD>"`
    snapshot: Record,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(
        store: Arc<ConfigStore>,
        triggers: Arc<TriggerEngine>,
        models: Arc<ModelRegistry>,
        probes: ProbeSet,
        actuator: Arc<dyn Actuator>,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            store,
            triggers,
            models,
            probes,
            actuator,
            output,
            periodic: None,
            snapshot: Record::new(),
            stats: DispatcherStats::default(),
        }
    }

    /// Override the periodic check cadence from the configuration.
    #[must_use]
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic = Some(interval);
        self
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    /// Push `config` into every component: triggers, models, probes.
    pub fn apply(&mut self, config: &Arc<ConfigSnapshot>) {
        let document = config.config();
        self.triggers.replace(document.triggers.clone());
        let loading = self.models.apply(&document.models).len();
        let enabled = self.probes.refresh_all(config);
        info!(
            generation = config.generation(),
            triggers = document.triggers.len(),
            models = document.models.len(),
            loading,
            probes_enabled = enabled,
            probes = self.probes.len(),
            "Configuration applied"
        );
        for status in self.probes.configurations() {
            debug!(
                probe = %status.name,
                state = %status.state,
                frequency = ?status.frequency,
                threshold = ?status.threshold,
                interval_ms = ?status.interval_ms,
                "Probe status"
            );
        }
    }

    /// Handle one event.
    pub fn handle(&mut self, event: WakeEvent) {
        match event {
            WakeEvent::PeriodicCheck => self.periodic_check(&Local::now()),
            WakeEvent::IncomingData(data) => self.incoming_data(&data),
            WakeEvent::ReloadConfiguration => self.request_reload(),
            WakeEvent::Command(command) => self.execute(&command),
        }
    }

    /// Evaluate time triggers against `now`.
    pub fn periodic_check<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) {
        self.stats.ticks += 1;
        let fired = self.triggers.on_tick(now);
        self.run_fired(fired);
    }

    fn incoming_data(&mut self, event: &DataEvent) {
        self.stats.data_events += 1;
        for (field, value) in &event.values {
            self.snapshot
                .insert(format!("{}.{}", event.source, field), value.clone());
        }

        let fired = self.triggers.on_data(event);
        self.run_fired(fired);

        let scheduled = self.models.predict_all(&self.snapshot, Instant::now(), &self.output);
        debug!(source = %event.source, scheduled, "Incoming data handled");
    }

    fn run_fired(&mut self, fired: Vec<FiredTrigger>) {
        for trigger in fired {
            self.stats.triggers_fired += 1;
            for command in &trigger.commands {
                self.execute(command);
            }
        }
    }

    fn execute(&mut self, command: &Command) {
        if *command == Command::ReloadConfiguration {
            self.request_reload();
            return;
        }
        match self.actuator.execute(command) {
            Ok(()) => self.stats.commands_executed += 1,
            Err(e) => warn!(action = command.action(), error = %e, "Command failed"),
        }
    }

    /// Re-read the backing file. Success is picked up through the change
    /// channel; failure keeps the current configuration.
    fn request_reload(&mut self) {
        match self.store.reload() {
            Ok(generation) => debug!(generation, "Reload requested"),
            Err(ConfigError::NoSource) => {
                warn!("Reload requested but no configuration file is in use");
            }
            Err(e) => warn!(error = %e, "Reload rejected, previous configuration stays active"),
        }
    }

    fn on_config_change(&mut self, changes: &mut watch::Receiver<u64>) {
        let generation = *changes.borrow_and_update();
        self.stats.reloads += 1;
        debug!(generation, "Configuration change observed");
        let config = self.store.snapshot();
        self.apply(&config);
    }

    /// Run until `cancel` fires or every event sender is gone.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WakeEvent>,
        cancel: CancellationToken,
    ) -> DispatcherStats {
        let mut changes = self.store.subscribe();
        changes.borrow_and_update();
        let initial = self.store.snapshot();
        self.apply(&initial);

        let period = self.periodic.unwrap_or_else(|| {
            Duration::from_secs(initial.config().dispatcher.periodic_check_secs.max(1))
        });
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; checks start one period in
        ticker.tick().await;

        info!(period_secs = period.as_secs_f64(), "Dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Dispatcher shutdown signal received");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("All event senders closed");
                        break;
                    };
                    self.handle(event);
                }
                _ = ticker.tick() => self.handle(WakeEvent::PeriodicCheck),
                changed = changes.changed() => {
                    if changed.is_err() {
                        warn!("Configuration store dropped");
                        break;
                    }
                    self.on_config_change(&mut changes);
                }
            }
        }

        self.probes.shutdown_all();
        info!(
            ticks = self.stats.ticks,
            data_events = self.stats.data_events,
            triggers_fired = self.stats.triggers_fired,
            commands_executed = self.stats.commands_executed,
            reloads = self.stats.reloads,
            "Dispatcher stopped"
        );
        self.stats
    }
}
