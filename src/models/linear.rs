//! Linear model family
//!
//! ```json
//! { "intercept": 0.5, "coefficients": { "pressure.PRESSURE": 0.01 } }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ModelError, PredictionValue};
use crate::types::Record;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearModel {
    #[serde(default)]
    pub intercept: f64,
    pub coefficients: BTreeMap<String, f64>,
}

impl LinearModel {
    pub fn compile(model: &serde_json::Value) -> Result<Self, ModelError> {
        let linear: Self = serde_json::from_value(model.clone())
            .map_err(|e| ModelError::Invalid(format!("linear model: {e}")))?;
        if linear.coefficients.is_empty() {
            return Err(ModelError::Invalid("linear model has no coefficients".into()));
        }
        Ok(linear)
    }

    /// Absent when any weighted feature is missing from the snapshot.
    pub fn evaluate(&self, snapshot: &Record) -> Option<PredictionValue> {
        let mut total = self.intercept;
        for (feature, weight) in &self.coefficients {
            total += weight * snapshot.get(feature)?.as_f64()?;
        }
        Some(PredictionValue::Continuous(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use serde_json::json;

    #[test]
    fn weighted_sum_plus_intercept() {
        let model = LinearModel::compile(&json!({
            "intercept": 1.0,
            "coefficients": { "a": 2.0, "b": -0.5 }
        }))
        .expect("compiles");
        let snapshot = Record::from([
            ("a".to_string(), Value::Real(3.0)),
            ("b".to_string(), Value::Integer(4)),
        ]);
        assert_eq!(model.evaluate(&snapshot), Some(PredictionValue::Continuous(5.0)));
    }

    #[test]
    fn missing_feature_is_absent() {
        let model = LinearModel::compile(&json!({ "coefficients": { "a": 1.0 } })).expect("compiles");
        assert_eq!(model.evaluate(&Record::new()), None);
    }

    #[test]
    fn rejects_malformed_definitions() {
        assert!(LinearModel::compile(&json!({ "coefficients": {} })).is_err());
        assert!(LinearModel::compile(&json!([1, 2, 3])).is_err());
    }
}
