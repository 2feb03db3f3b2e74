//! Prediction model runtime
//!
//! Models are defined remotely as JSON documents:
//!
//! ```json
//! { "class": "Activity", "accuracy": 0.82, "model": { ... } }
//! ```
//!
//! `model` is handed to the compiler of the family named in the model's
//! configuration entry. Definitions are cached on disk by source URI, and a
//! model only evaluates once a definition has compiled.

pub mod cache;
pub mod fetch;
pub mod linear;
pub mod registry;
pub mod throttle;
pub mod trained;
pub mod tree;

pub use cache::{model_key, ModelCache};
pub use fetch::{FetchError, HttpModelFetcher, ModelFetcher};
pub use linear::LinearModel;
pub use registry::ModelRegistry;
pub use throttle::PredictionThrottle;
pub use trained::{CompiledModel, ModelState, TrainedModel};
pub use tree::DecisionTree;

use serde::{Deserialize, Serialize};

use crate::types::{Record, Value, TIMESTAMP_KEY};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Model definition is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model definition is missing '{0}'")]
    MissingField(&'static str),

    #[error("Unknown model family '{0}'")]
    UnknownFamily(String),

    #[error("Invalid model: {0}")]
    Invalid(String),

    #[error("No usable definition for {0}")]
    NoDefinition(String),
}

/// One `[[models]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Source of the model definition (`https://`, `http://` or `file://`)
    pub uri: String,

    /// Compiler for the `model` field: `linear` or `tree`
    #[serde(default = "default_family")]
    pub family: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_family() -> String {
    "linear".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Output of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionValue {
    Continuous(f64),
    Categorical(String),
}

impl From<PredictionValue> for Value {
    fn from(value: PredictionValue) -> Self {
        match value {
            PredictionValue::Continuous(v) => Value::Real(v),
            PredictionValue::Categorical(s) => Value::Text(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub model_uri: String,
    pub model_name: String,
    pub value: PredictionValue,
    pub accuracy: f64,
    /// Wall-clock seconds since the epoch
    pub timestamp: f64,
}

impl Prediction {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("MODEL".to_string(), Value::Text(self.model_uri.clone())),
            ("MODEL_NAME".to_string(), Value::Text(self.model_name.clone())),
            ("PREDICTION".to_string(), self.value.clone().into()),
            ("ACCURACY".to_string(), Value::Real(self.accuracy)),
            (TIMESTAMP_KEY.to_string(), Value::Real(self.timestamp)),
        ])
    }
}
