//! Trigger engine
//!
//! Triggers are condition to action rules loaded from the `[[triggers]]`
//! tables of the configuration. The active set is replaced wholesale on
//! reload; firing a trigger yields [`Command`]s for the dispatcher to run.

pub mod condition;
pub mod engine;

pub use condition::{
    Comparison, Condition, ConditionClass, DailyWindow, DataCondition, Operand, TimeCondition,
};
pub use engine::{FiredTrigger, TriggerEngine, TriggerSet};

use serde::{Deserialize, Serialize};

use crate::commands::Command;

/// One `[[triggers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub condition: Condition,

    #[serde(default)]
    pub actions: Vec<Command>,
}

fn default_enabled() -> bool {
    true
}

impl TriggerDefinition {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_defaults() {
        let def: TriggerDefinition = toml::from_str(
            r#"
            id = "quiet-hours"
            condition = { kind = "time", between = ["22:00", "07:00"] }
            "#,
        )
        .expect("parses");
        assert!(def.enabled);
        assert!(def.actions.is_empty());
        assert_eq!(def.label(), "quiet-hours");
        assert_eq!(def.condition.class(), ConditionClass::Time);
    }
}
