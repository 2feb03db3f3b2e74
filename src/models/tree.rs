//! Decision tree model family
//!
//! Definitions are nested JSON:
//!
//! ```json
//! { "feature": "light.LIGHT", "threshold": 10.0,
//!   "left":  { "leaf": "dark" },
//!   "right": { "leaf": "bright" } }
//! ```
//!
//! Compilation flattens them into an index-addressed node array; a sample
//! goes left when its feature value is below the threshold.

use super::{ModelError, PredictionValue};
use crate::types::Record;

/// Deepest nesting accepted from a definition.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Split {
        feature: String,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(PredictionValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub depth: usize,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    /// Root at index 0
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn compile(model: &serde_json::Value) -> Result<Self, ModelError> {
        let mut nodes = Vec::new();
        build(model, 0, &mut nodes)?;
        Ok(Self { nodes })
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Absent when a split feature is missing from the snapshot.
    pub fn evaluate(&self, snapshot: &Record) -> Option<PredictionValue> {
        let mut index = 0;
        loop {
            match &self.nodes.get(index)?.kind {
                NodeKind::Leaf(value) => return Some(value.clone()),
                NodeKind::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = snapshot.get(feature)?.as_f64()?;
                    index = if value < *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Append `value` and its subtree to `nodes`, returning its index.
/// Children always land after their parent, so traversal terminates.
fn build(value: &serde_json::Value, depth: usize, nodes: &mut Vec<Node>) -> Result<usize, ModelError> {
    if depth > MAX_DEPTH {
        return Err(ModelError::Invalid(format!("tree deeper than {MAX_DEPTH}")));
    }
    let object = value
        .as_object()
        .ok_or_else(|| ModelError::Invalid("tree node is not an object".into()))?;

    if let Some(leaf) = object.get("leaf") {
        let output = match leaf {
            serde_json::Value::Number(n) => n.as_f64().map(PredictionValue::Continuous),
            serde_json::Value::String(s) => Some(PredictionValue::Categorical(s.clone())),
            serde_json::Value::Bool(b) => Some(PredictionValue::Categorical(b.to_string())),
            _ => None,
        }
        .ok_or_else(|| ModelError::Invalid("leaf must be a number, string or bool".into()))?;
        nodes.push(Node {
            kind: NodeKind::Leaf(output),
            depth,
        });
        return Ok(nodes.len() - 1);
    }

    let feature = object
        .get("feature")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ModelError::Invalid("split node needs a string 'feature'".into()))?
        .to_string();
    let threshold = object
        .get("threshold")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| ModelError::Invalid(format!("split on '{feature}' needs a numeric 'threshold'")))?;
    let left_def = object
        .get("left")
        .ok_or_else(|| ModelError::Invalid(format!("split on '{feature}' has no 'left'")))?;
    let right_def = object
        .get("right")
        .ok_or_else(|| ModelError::Invalid(format!("split on '{feature}' has no 'right'")))?;

    // Reserve the slot, then patch in child indices once they exist.
    let index = nodes.len();
    nodes.push(Node {
        kind: NodeKind::Leaf(PredictionValue::Continuous(f64::NAN)),
        depth,
    });
    let left = build(left_def, depth + 1, nodes)?;
    let right = build(right_def, depth + 1, nodes)?;
    nodes[index].kind = NodeKind::Split {
        feature,
        threshold,
        left,
        right,
    };
    Ok(index)
}
