//! Trigger conditions
//!
//! Time conditions are evaluated on periodic ticks, data conditions on
//! incoming data events. A condition never sees the other event class.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::{DataEvent, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Condition {
    Time(TimeCondition),
    Data(DataCondition),
}

impl Condition {
    pub fn class(&self) -> ConditionClass {
        match self {
            Self::Time(_) => ConditionClass::Time,
            Self::Data(_) => ConditionClass::Data,
        }
    }
}

/// Which event class a condition is eligible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionClass {
    Time,
    Data,
}

// ============================================================================
// Time
// ============================================================================

/// Every present constraint must hold. An empty condition matches always.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeCondition {
    /// Not before this instant (RFC 3339)
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,

    /// Not after this instant (RFC 3339)
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,

    /// Daily window in the clock's local time
    #[serde(default)]
    pub between: Option<DailyWindow>,

    #[serde(default)]
    pub weekdays: Option<Vec<Weekday>>,
}

impl TimeCondition {
    pub fn matches<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let millis = now.timestamp_millis();
        if self.start.is_some_and(|start| millis < start.timestamp_millis()) {
            return false;
        }
        if self.end.is_some_and(|end| millis > end.timestamp_millis()) {
            return false;
        }
        if let Some(days) = &self.weekdays {
            if !days.contains(&now.weekday()) {
                return false;
            }
        }
        if let Some(window) = &self.between {
            let time_of_day = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second());
            if !time_of_day.is_some_and(|t| window.contains(t)) {
                return false;
            }
        }
        true
    }
}

/// `["HH:MM", "HH:MM"]`, start inclusive, end exclusive. A start later than
/// the end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid time of day '{0}', expected HH:MM")]
pub struct InvalidTimeOfDay(String);

fn parse_time_of_day(s: &str) -> Result<NaiveTime, InvalidTimeOfDay> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| InvalidTimeOfDay(s.to_string()))
}

impl TryFrom<[String; 2]> for DailyWindow {
    type Error = InvalidTimeOfDay;

    fn try_from([start, end]: [String; 2]) -> Result<Self, Self::Error> {
        Ok(Self {
            start: parse_time_of_day(&start)?,
            end: parse_time_of_day(&end)?,
        })
    }
}

impl From<DailyWindow> for [String; 2] {
    fn from(window: DailyWindow) -> Self {
        [
            window.start.format("%H:%M").to_string(),
            window.end.format("%H:%M").to_string(),
        ]
    }
}

// ============================================================================
// Data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    /// Fires whenever the field differs from the previous observation
    Changed,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Changed => "changed",
        };
        f.write_str(op)
    }
}

/// Operand of a data condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCondition {
    /// Probe whose events are inspected
    pub probe: String,
    pub field: String,
    pub op: Comparison,
    /// Required by every comparison except `changed`
    #[serde(default)]
    pub value: Option<Operand>,
}

impl DataCondition {
    /// The inspected field of `event`, if the event belongs to this condition.
    pub fn observe<'a>(&self, event: &'a DataEvent) -> Option<&'a Value> {
        if event.source != self.probe {
            return None;
        }
        event.values.get(&self.field)
    }

    /// Compare an observed value. `previous` is only consulted by `changed`,
    /// and a first observation (no previous) does not count as a change.
    pub fn holds(&self, observed: &Value, previous: Option<&Value>) -> bool {
        if self.op == Comparison::Changed {
            return previous.is_some_and(|prev| prev != observed);
        }

        match (&self.value, observed) {
            (Some(Operand::Text(expected)), Value::Text(actual)) => match self.op {
                Comparison::Eq => actual == expected,
                Comparison::Ne => actual != expected,
                _ => false,
            },
            (Some(Operand::Number(expected)), actual) => {
                let Some(actual) = actual.as_f64() else {
                    return false;
                };
                match self.op {
                    Comparison::Gt => actual > *expected,
                    Comparison::Ge => actual >= *expected,
                    Comparison::Lt => actual < *expected,
                    Comparison::Le => actual <= *expected,
                    Comparison::Eq => (actual - expected).abs() < f64::EPSILON,
                    Comparison::Ne => (actual - expected).abs() >= f64::EPSILON,
                    Comparison::Changed => false,
                }
            }
            _ => false,
        }
    }
}
