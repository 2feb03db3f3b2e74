//! Builds the device's probe set from the startup configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::acquisition::{ChannelSource, SampleSource};
use crate::config::defaults::{APP_LAUNCH_PROBE, PROBE_BUFFER_CAPACITY};
use crate::config::ConfigSnapshot;
use crate::probes::{
    AppLaunchProbe, CategoryLookup, ChannelSpec, CompositeProbe, ContinuousProbe,
    ForegroundMonitor, Probe, ProbeContext, ProbeSet, ReportedForeground,
};

/// The input side of the assembled probes: where samples and foreground
/// reports are pushed in.
#[derive(Clone)]
pub struct DeviceInputs {
    pub sources: BTreeMap<String, Arc<ChannelSource>>,
    pub foreground: Arc<ReportedForeground>,
    pub app_launch: Arc<AppLaunchProbe>,
}

impl DeviceInputs {
    pub fn source(&self, probe: &str) -> Option<&Arc<ChannelSource>> {
        self.sources.get(probe)
    }
}

/// One continuous probe per configured channel, the application-launch
/// probe, and a composite for every table listing `members`. Members are
/// only reachable through their group.
///
/// The set is fixed for the process lifetime; reloads enable and disable
/// probes but never add new ones.
pub fn build_probes(
    config: &ConfigSnapshot,
    ctx: &ProbeContext,
    categories: Arc<dyn CategoryLookup>,
) -> (ProbeSet, DeviceInputs) {
    let settings = &config.config().probes;
    let foreground = Arc::new(ReportedForeground::new());
    let app_launch = Arc::new(AppLaunchProbe::new(
        Arc::clone(&foreground) as Arc<dyn ForegroundMonitor>,
        categories,
        ctx.clone(),
    ));

    let groups: BTreeSet<&str> = settings
        .iter()
        .filter(|(_, s)| !s.members.is_empty())
        .map(|(name, _)| name.as_str())
        .collect();
    let grouped: BTreeSet<&str> = settings
        .values()
        .flat_map(|s| s.members.iter().map(String::as_str))
        .collect();

    let mut sources = BTreeMap::new();
    let mut built: BTreeMap<&str, Arc<dyn Probe>> = BTreeMap::new();
    built.insert(APP_LAUNCH_PROBE, Arc::clone(&app_launch) as Arc<dyn Probe>);

    for (name, probe_settings) in settings {
        if name == APP_LAUNCH_PROBE || groups.contains(name.as_str()) {
            continue;
        }
        let source = Arc::new(ChannelSource::virtual_sensor(name.clone()));
        let probe = ContinuousProbe::with_capacity(
            ChannelSpec::for_probe(name),
            Arc::clone(&source) as Arc<dyn SampleSource>,
            ctx.clone(),
            probe_settings.buffer_capacity.unwrap_or(PROBE_BUFFER_CAPACITY),
        );
        sources.insert(name.clone(), source);
        built.insert(name.as_str(), Arc::new(probe));
    }

    let mut set = ProbeSet::new();
    for group in &groups {
        let members: Vec<Arc<dyn Probe>> = settings[*group]
            .members
            .iter()
            .filter_map(|member| {
                let probe = built.get(member.as_str()).cloned();
                if probe.is_none() {
                    warn!(group = %group, member = %member, "Group member is not a sampled probe, ignored");
                }
                probe
            })
            .collect();
        set.push(Arc::new(CompositeProbe::new(*group, members)));
    }
    for (name, probe) in &built {
        if !grouped.contains(name) {
            set.push(Arc::clone(probe));
        }
    }

    info!(probes = set.len(), sources = sources.len(), groups = groups.len(), "Probe set assembled");
    (
        set,
        DeviceInputs {
            sources,
            foreground,
            app_launch,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FixedClock;
    use crate::output::LogOutput;
    use crate::probes::CategoryTable;
    use crate::storage::SledStorage;
    use crate::workers::WorkerPool;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn groups_wrap_their_members() {
        let doc = r#"
            [probes.pressure]
            enabled = true

            [probes.gyroscope]
            enabled = true

            [probes.motion]
            enabled = true
            members = ["gyroscope"]
        "#;
        let config = ConfigSnapshot::parse(doc).expect("config");
        let (events, _rx) = mpsc::unbounded_channel();
        let ctx = ProbeContext {
            output: Arc::new(LogOutput),
            storage: Arc::new(SledStorage::temporary().expect("temp db")),
            workers: WorkerPool::new(1).expect("pool"),
            events,
            clock: Arc::new(FixedClock {
                wall_ns: 1,
                monotonic_ns: 1,
            }),
        };

        let (set, inputs) = build_probes(&config, &ctx, Arc::new(CategoryTable::new()));
        for name in ["motion", "pressure", APP_LAUNCH_PROBE] {
            assert!(set.get(name).is_some(), "{name} missing");
        }
        assert!(set.get("gyroscope").is_none());
        assert_eq!(set.len(), 3);
        assert!(inputs.source("gyroscope").is_some());
        assert!(inputs.source("motion").is_none());
    }
}
