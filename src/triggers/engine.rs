//! Trigger evaluation
//!
//! The engine holds the active [`TriggerSet`] behind an `ArcSwap`. Each
//! evaluation loads the set once and works on that snapshot, so a reload
//! running concurrently is observed either entirely or not at all.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeZone};
use tracing::{debug, info, warn};

use super::{Comparison, Condition, TriggerDefinition};
use crate::commands::Command;
use crate::types::{DataEvent, Value};

/// A trigger whose condition matched, with the commands it issues.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTrigger {
    pub id: String,
    pub commands: Vec<Command>,
}

struct Trigger {
    definition: TriggerDefinition,
    /// Last observed field value, for `changed` conditions
    last_seen: Mutex<Option<Value>>,
}

impl Trigger {
    fn fired(&self) -> FiredTrigger {
        FiredTrigger {
            id: self.definition.id.clone(),
            commands: self.definition.actions.clone(),
        }
    }
}

/// An immutable, ordered set of triggers.
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    pub fn new(definitions: Vec<TriggerDefinition>) -> Self {
        let triggers = definitions
            .into_iter()
            .inspect(|def| {
                if let Condition::Data(data) = &def.condition {
                    if data.op != Comparison::Changed && data.value.is_none() {
                        warn!(trigger = %def.id, op = %data.op, "Data trigger has no value to compare against and will never fire");
                    }
                }
            })
            .map(|definition| Trigger {
                definition,
                last_seen: Mutex::new(None),
            })
            .collect();
        Self { triggers }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.triggers.iter().map(|t| t.definition.id.as_str()).collect()
    }
}

pub struct TriggerEngine {
    active: ArcSwap<TriggerSet>,
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TriggerEngine {
    pub fn new(definitions: Vec<TriggerDefinition>) -> Self {
        Self {
            active: ArcSwap::from_pointee(TriggerSet::new(definitions)),
        }
    }

    /// Install a new trigger set in one step. State of the old set
    /// (including `changed` baselines) is discarded with it.
    pub fn replace(&self, definitions: Vec<TriggerDefinition>) {
        let set = TriggerSet::new(definitions);
        info!(triggers = set.len(), "Trigger set replaced");
        self.active.store(Arc::new(set));
    }

    pub fn snapshot(&self) -> Arc<TriggerSet> {
        self.active.load_full()
    }

    /// Periodic check: evaluate time conditions against `now`.
    pub fn on_tick<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<FiredTrigger> {
        let set = self.active.load();
        let mut fired = Vec::new();
        for trigger in set.triggers.iter().filter(|t| t.definition.enabled) {
            if let Condition::Time(condition) = &trigger.definition.condition {
                if condition.matches(now) {
                    debug!(trigger = %trigger.definition.id, "Time trigger matched");
                    fired.push(trigger.fired());
                }
            }
        }
        fired
    }

    /// Incoming data: evaluate data conditions against `event`.
    pub fn on_data(&self, event: &DataEvent) -> Vec<FiredTrigger> {
        let set = self.active.load();
        let mut fired = Vec::new();
        for trigger in set.triggers.iter().filter(|t| t.definition.enabled) {
            let Condition::Data(condition) = &trigger.definition.condition else {
                continue;
            };
            let Some(observed) = condition.observe(event) else {
                continue;
            };

            let mut last_seen = trigger
                .last_seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let holds = condition.holds(observed, last_seen.as_ref());
            *last_seen = Some(observed.clone());
            drop(last_seen);

            if holds {
                debug!(trigger = %trigger.definition.id, probe = %event.source, "Data trigger matched");
                fired.push(trigger.fired());
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{DataCondition, Operand, TimeCondition};
    use crate::types::Record;
    use chrono::Utc;

    fn time_trigger(id: &str, tone: &str) -> TriggerDefinition {
        TriggerDefinition {
            id: id.into(),
            name: None,
            enabled: true,
            condition: Condition::Time(TimeCondition::default()),
            actions: vec![Command::PlayTone {
                name: Some(tone.into()),
            }],
        }
    }

    fn data_trigger(id: &str, op: Comparison, value: Option<f64>) -> TriggerDefinition {
        TriggerDefinition {
            id: id.into(),
            name: None,
            enabled: true,
            condition: Condition::Data(DataCondition {
                probe: "light".into(),
                field: "LIGHT".into(),
                op,
                value: value.map(Operand::Number),
            }),
            actions: vec![Command::ReloadConfiguration],
        }
    }

    fn light(value: f64) -> DataEvent {
        DataEvent {
            source: "light".into(),
            timestamp: 0.0,
            values: Record::from([("LIGHT".to_string(), Value::Real(value))]),
        }
    }

    #[test]
    fn event_classes_do_not_overlap() {
        let engine = TriggerEngine::new(vec![
            time_trigger("clock", "a"),
            data_trigger("bright", Comparison::Gt, Some(10.0)),
        ]);

        let on_tick = engine.on_tick(&Utc::now());
        assert_eq!(on_tick.len(), 1);
        assert_eq!(on_tick[0].id, "clock");

        let on_data = engine.on_data(&light(50.0));
        assert_eq!(on_data.len(), 1);
        assert_eq!(on_data[0].id, "bright");
    }

    #[test]
    fn disabled_triggers_never_fire() {
        let mut def = time_trigger("clock", "a");
        def.enabled = false;
        let engine = TriggerEngine::new(vec![def]);
        assert!(engine.on_tick(&Utc::now()).is_empty());
    }

    #[test]
    fn changed_tracks_previous_value() {
        let engine = TriggerEngine::new(vec![data_trigger("moved", Comparison::Changed, None)]);
        assert!(engine.on_data(&light(1.0)).is_empty());
        assert!(engine.on_data(&light(1.0)).is_empty());
        assert_eq!(engine.on_data(&light(4.0)).len(), 1);
    }

    #[test]
    fn fired_triggers_keep_configured_order() {
        let engine = TriggerEngine::new(vec![
            time_trigger("first", "a"),
            time_trigger("second", "b"),
            time_trigger("third", "c"),
        ]);
        let ids: Vec<String> = engine.on_tick(&Utc::now()).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn reload_is_observed_atomically() {
        let set_a: Vec<TriggerDefinition> = (0..3).map(|i| time_trigger(&format!("a{i}"), "A")).collect();
        let set_b: Vec<TriggerDefinition> = (0..7).map(|i| time_trigger(&format!("b{i}"), "B")).collect();
        let engine = Arc::new(TriggerEngine::new(set_a.clone()));

        let writer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for round in 0..500 {
                    let next = if round % 2 == 0 { set_b.clone() } else { set_a.clone() };
                    engine.replace(next);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let fired = engine.on_tick(&Utc::now());
                        let tones: Vec<&Command> = fired.iter().flat_map(|f| &f.commands).collect();
                        let all_a = fired.len() == 3
                            && tones.iter().all(|c| **c == Command::PlayTone { name: Some("A".into()) });
                        let all_b = fired.len() == 7
                            && tones.iter().all(|c| **c == Command::PlayTone { name: Some("B".into()) });
                        assert!(all_a || all_b, "observed a mixed trigger set: {fired:?}");
                    }
                })
            })
            .collect();

        writer.join().expect("writer joins");
        for reader in readers {
            reader.join().expect("reader joins");
        }
    }
}
