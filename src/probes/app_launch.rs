//! Application-launch probe
//!
//! Tracks the foreground application and emits one event per identity
//! change, carrying the previous and the current application together with
//! their categories. Polling runs on its own task and restarts whenever the
//! configured interval changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Probe, ProbeConfiguration, ProbeContext, ProbeState};
use crate::config::defaults::{
    APP_LAUNCH_INTERVAL_MS, APP_LAUNCH_PROBE, UNKNOWN_APP_CATEGORY, UNKNOWN_APP_LABEL,
};
use crate::config::ConfigSnapshot;
use crate::pipeline::WakeEvent;
use crate::types::{DataEvent, Record, PROBE_KEY, TIMESTAMP_KEY};

pub const CURRENT_APP_PKG: &str = "CURRENT_APP_PKG";
pub const CURRENT_APP_NAME: &str = "CURRENT_APP_NAME";
pub const CURRENT_CATEGORY: &str = "CURRENT_CATEGORY";
pub const PREVIOUS_APP_PKG: &str = "PREVIOUS_APP_PKG";
pub const PREVIOUS_CATEGORY: &str = "PREVIOUS_CATEGORY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundApp {
    pub package: String,
    /// Human-readable name, when the platform can resolve one
    pub label: Option<String>,
}

impl ForegroundApp {
    pub fn new(package: impl Into<String>, label: Option<String>) -> Self {
        Self {
            package: package.into(),
            label,
        }
    }
}

/// Reports which application is in the foreground right now.
pub trait ForegroundMonitor: Send + Sync {
    fn foreground(&self) -> Option<ForegroundApp>;
}

/// A monitor fed from outside (stdin feed, tests).
#[derive(Debug, Default)]
pub struct ReportedForeground {
    current: Mutex<Option<ForegroundApp>>,
}

impl ReportedForeground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, app: ForegroundApp) {
        *self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(app);
    }
}

impl ForegroundMonitor for ReportedForeground {
    fn foreground(&self) -> Option<ForegroundApp> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

pub trait CategoryLookup: Send + Sync {
    fn category(&self, package: &str) -> Option<String>;
}

/// Static package to category table.
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    categories: BTreeMap<String, String>,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, package: impl Into<String>, category: impl Into<String>) -> Self {
        self.categories.insert(package.into(), category.into());
        self
    }
}

impl From<BTreeMap<String, String>> for CategoryTable {
    fn from(categories: BTreeMap<String, String>) -> Self {
        Self { categories }
    }
}

impl CategoryLookup for CategoryTable {
    fn category(&self, package: &str) -> Option<String> {
        self.categories.get(package).cloned()
    }
}

#[derive(Debug, Clone)]
struct Identity {
    package: String,
    category: String,
}

struct Lifecycle {
    state: ProbeState,
    interval_ms: Option<u64>,
    poller: Option<CancellationToken>,
}

struct Tracker {
    monitor: Arc<dyn ForegroundMonitor>,
    categories: Arc<dyn CategoryLookup>,
    ctx: ProbeContext,
    current: Mutex<Option<Identity>>,
}

impl Tracker {
    fn category_of(&self, package: &str) -> String {
        self.categories
            .category(package)
            .unwrap_or_else(|| UNKNOWN_APP_CATEGORY.to_string())
    }

    fn observe(&self, app: Option<ForegroundApp>) -> Option<Record> {
        let app = app?;
        let mut current = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| c.package == app.package) {
            return None;
        }

        let category = self.category_of(&app.package);
        #[allow(clippy::cast_precision_loss)]
        let timestamp = self.ctx.clock.wall_ns() as f64 / 1e9;

        let mut payload = Record::new();
        payload.insert(PROBE_KEY.into(), APP_LAUNCH_PROBE.into());
        payload.insert(TIMESTAMP_KEY.into(), timestamp.into());
        payload.insert(CURRENT_APP_PKG.into(), app.package.clone().into());
        payload.insert(
            CURRENT_APP_NAME.into(),
            app.label.clone().unwrap_or_else(|| UNKNOWN_APP_LABEL.to_string()).into(),
        );
        payload.insert(CURRENT_CATEGORY.into(), category.clone().into());
        if let Some(previous) = current.as_ref() {
            payload.insert(PREVIOUS_APP_PKG.into(), previous.package.clone().into());
            payload.insert(PREVIOUS_CATEGORY.into(), previous.category.clone().into());
        }

        info!(
            previous = current.as_ref().map_or("-", |c| c.package.as_str()),
            current = %app.package,
            category = %category,
            "Foreground application changed"
        );
        *current = Some(Identity {
            package: app.package,
            category,
        });
        drop(current);

        self.ctx.output.transmit(APP_LAUNCH_PROBE, payload.clone());
        let event = DataEvent {
            source: APP_LAUNCH_PROBE.to_string(),
            timestamp,
            values: payload.clone(),
        };
        if self.ctx.events.send(WakeEvent::IncomingData(event)).is_err() {
            debug!("Dispatcher gone, application-launch event dropped");
        }
        Some(payload)
    }
}

pub struct AppLaunchProbe {
    tracker: Arc<Tracker>,
    lifecycle: Mutex<Lifecycle>,
}

impl AppLaunchProbe {
    pub fn new(
        monitor: Arc<dyn ForegroundMonitor>,
        categories: Arc<dyn CategoryLookup>,
        ctx: ProbeContext,
    ) -> Self {
        Self {
            tracker: Arc::new(Tracker {
                monitor,
                categories,
                ctx,
                current: Mutex::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: ProbeState::Disabled,
                interval_ms: None,
                poller: None,
            }),
        }
    }

    /// Feed one observation. Returns the emitted payload when the
    /// foreground identity changed.
    pub fn observe(&self, app: Option<ForegroundApp>) -> Option<Record> {
        self.tracker.observe(app)
    }

    /// Ask the monitor once, outside the polling schedule.
    pub fn poll_now(&self) -> Option<Record> {
        self.tracker.observe(self.tracker.monitor.foreground())
    }

    /// Package currently considered in the foreground.
    pub fn current_package(&self) -> Option<String> {
        self.tracker
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|c| c.package.clone())
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn stop(lifecycle: &mut Lifecycle) {
        if let Some(poller) = lifecycle.poller.take() {
            poller.cancel();
        }
        lifecycle.interval_ms = None;
    }

    fn spawn_poller(&self, interval_ms: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tracker = Arc::clone(&self.tracker);

        self.tracker.ctx.workers.handle().spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(interval_ms, "Application-launch poller stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracker.observe(tracker.monitor.foreground());
                    }
                }
            }
        });
        cancel
    }
}

impl Probe for AppLaunchProbe {
    fn name(&self) -> &str {
        APP_LAUNCH_PROBE
    }

    fn refresh(&self, config: &Arc<ConfigSnapshot>) -> bool {
        let enabled = config.get_bool(&format!("probes.{APP_LAUNCH_PROBE}.enabled"), false);
        let interval_ms = u64::try_from(config.get_i64(
            &format!("probes.{APP_LAUNCH_PROBE}.interval_ms"),
            i64::try_from(APP_LAUNCH_INTERVAL_MS).unwrap_or(i64::MAX),
        ))
        .unwrap_or(APP_LAUNCH_INTERVAL_MS)
        .max(1);

        let mut lifecycle = self.lock_lifecycle();
        if !enabled {
            if lifecycle.state == ProbeState::Enabled {
                info!(probe = APP_LAUNCH_PROBE, "Probe disabled");
            }
            Self::stop(&mut lifecycle);
            lifecycle.state = ProbeState::Disabled;
            return false;
        }

        if lifecycle.state == ProbeState::Enabled && lifecycle.interval_ms == Some(interval_ms) {
            return true;
        }

        Self::stop(&mut lifecycle);
        lifecycle.poller = Some(self.spawn_poller(interval_ms));
        lifecycle.interval_ms = Some(interval_ms);
        lifecycle.state = ProbeState::Enabled;
        info!(probe = APP_LAUNCH_PROBE, interval_ms, "Probe enabled");
        true
    }

    fn shutdown(&self) {
        let mut lifecycle = self.lock_lifecycle();
        Self::stop(&mut lifecycle);
        lifecycle.state = ProbeState::Disabled;
    }

    fn state(&self) -> ProbeState {
        self.lock_lifecycle().state
    }

    fn configuration(&self) -> ProbeConfiguration {
        let lifecycle = self.lock_lifecycle();
        ProbeConfiguration {
            name: APP_LAUNCH_PROBE.to_string(),
            state: lifecycle.state,
            frequency: None,
            threshold: None,
            interval_ms: lifecycle.interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FixedClock;
    use crate::output::{ChannelOutput, Transmission};
    use crate::storage::SledStorage;
    use crate::types::Value;
    use crate::workers::WorkerPool;
    use tokio::sync::mpsc;

    struct Harness {
        monitor: Arc<ReportedForeground>,
        probe: AppLaunchProbe,
        output_rx: mpsc::UnboundedReceiver<Transmission>,
        events_rx: mpsc::UnboundedReceiver<WakeEvent>,
    }

    fn harness() -> Harness {
        let monitor = Arc::new(ReportedForeground::new());
        let categories = CategoryTable::new()
            .with("org.mail", "Communication")
            .with("org.maps", "Travel");
        let (output, output_rx) = ChannelOutput::new();
        let (events, events_rx) = mpsc::unbounded_channel();
        let ctx = ProbeContext {
            output: Arc::new(output),
            storage: Arc::new(SledStorage::temporary().expect("temp db")),
            workers: WorkerPool::new(1).expect("pool"),
            events,
            clock: Arc::new(FixedClock {
                wall_ns: 1_700_000_000_000_000_000,
                monotonic_ns: 0,
            }),
        };
        let probe = AppLaunchProbe::new(
            Arc::clone(&monitor) as Arc<dyn ForegroundMonitor>,
            Arc::new(categories),
            ctx,
        );
        Harness {
            monitor,
            probe,
            output_rx,
            events_rx,
        }
    }

    fn text<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
        record.get(key).and_then(Value::as_str)
    }

    #[tokio::test]
    async fn emits_only_on_identity_change() {
        let mut h = harness();

        let first = h
            .probe
            .observe(Some(ForegroundApp::new("org.mail", Some("Mail".into()))))
            .expect("first observation emits");
        assert_eq!(text(&first, CURRENT_APP_NAME), Some("Mail"));
        assert_eq!(text(&first, CURRENT_CATEGORY), Some("Communication"));
        assert!(!first.contains_key(PREVIOUS_APP_PKG));
        assert!(!first.contains_key(PREVIOUS_CATEGORY));

        assert!(h
            .probe
            .observe(Some(ForegroundApp::new("org.mail", None)))
            .is_none());
        assert!(h.probe.observe(None).is_none());

        let second = h
            .probe
            .observe(Some(ForegroundApp::new("org.unknown", None)))
            .expect("change emits");
        assert_eq!(text(&second, PREVIOUS_APP_PKG), Some("org.mail"));
        assert_eq!(text(&second, PREVIOUS_CATEGORY), Some("Communication"));
        assert_eq!(text(&second, CURRENT_APP_NAME), Some(UNKNOWN_APP_LABEL));
        assert_eq!(text(&second, CURRENT_CATEGORY), Some(UNKNOWN_APP_CATEGORY));
        assert_eq!(
            second.get(TIMESTAMP_KEY).and_then(Value::as_f64),
            Some(1_700_000_000.0)
        );

        let sent = h.output_rx.recv().await.expect("transmitted");
        assert_eq!(sent.source, APP_LAUNCH_PROBE);
        assert!(matches!(h.events_rx.recv().await, Some(WakeEvent::IncomingData(_))));
        assert_eq!(h.probe.current_package().as_deref(), Some("org.unknown"));
    }

    #[tokio::test]
    async fn poller_follows_configuration() {
        let mut h = harness();
        h.monitor.report(ForegroundApp::new("org.maps", Some("Maps".into())));

        let config = Arc::new(
            ConfigSnapshot::parse("[probes.application_launch]\nenabled = true\ninterval_ms = 10\n")
                .expect("config"),
        );
        assert!(h.probe.refresh(&config));
        assert_eq!(h.probe.configuration().interval_ms, Some(10));

        let sent = tokio::time::timeout(Duration::from_secs(2), h.output_rx.recv())
            .await
            .expect("poller emitted in time")
            .expect("transmission");
        assert_eq!(text(&sent.payload, CURRENT_APP_PKG), Some("org.maps"));

        let off = Arc::new(
            ConfigSnapshot::parse("[probes.application_launch]\nenabled = false\n").expect("config"),
        );
        assert!(!h.probe.refresh(&off));
        assert_eq!(h.probe.state(), ProbeState::Disabled);
        assert_eq!(h.probe.configuration().interval_ms, None);
    }
}
