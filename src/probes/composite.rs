//! Composite probe: one group flag gating several member probes.
//!
//! With the group on, each member follows its own configuration. With the
//! group off, every member is shut down whatever its own flag says.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use super::{Probe, ProbeConfiguration, ProbeState};
use crate::config::ConfigSnapshot;

pub struct CompositeProbe {
    name: String,
    members: Vec<Arc<dyn Probe>>,
    state: Mutex<ProbeState>,
}

impl CompositeProbe {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Probe>>) -> Self {
        Self {
            name: name.into(),
            members,
            state: Mutex::new(ProbeState::Disabled),
        }
    }

    pub fn members(&self) -> &[Arc<dyn Probe>] {
        &self.members
    }

    fn lock_state(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Probe for CompositeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh(&self, config: &Arc<ConfigSnapshot>) -> bool {
        let enabled = config.get_bool(&format!("probes.{}.enabled", self.name), false);
        let mut state = self.lock_state();

        if !enabled {
            if *state == ProbeState::Enabled {
                info!(group = %self.name, members = self.members.len(), "Probe group disabled");
            }
            for member in &self.members {
                member.shutdown();
            }
            *state = ProbeState::Disabled;
            return false;
        }

        let active = self.members.iter().filter(|m| m.refresh(config)).count();
        info!(group = %self.name, active, members = self.members.len(), "Probe group refreshed");
        *state = ProbeState::Enabled;
        true
    }

    fn shutdown(&self) {
        for member in &self.members {
            member.shutdown();
        }
        *self.lock_state() = ProbeState::Disabled;
    }

    fn state(&self) -> ProbeState {
        *self.lock_state()
    }

    fn configuration(&self) -> ProbeConfiguration {
        ProbeConfiguration {
            name: self.name.clone(),
            state: self.state(),
            frequency: None,
            threshold: None,
            interval_ms: None,
        }
    }
}
