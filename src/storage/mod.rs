//! Row storage contract
//!
//! Probes persist every flushed sample as one row in a per-probe table.
//! A table is described by a schema (column name to declared type); rows are
//! validated against it on insert and projected onto it on query.

pub mod history;

pub use history::SledStorage;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Record, Value};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Column '{column}' of table '{table}' expects {expected:?}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
    },

    #[error("Column '{column}' is not declared for table '{table}'")]
    UnknownColumn { table: String, column: String },
}

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Real,
    Integer,
    Text,
    Blob,
}

impl ColumnType {
    /// Null is accepted by every column.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Real, Value::Real(_) | Value::Integer(_))
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Blob, Value::Bytes(_))
        )
    }

    /// Bring a value read back from storage into the declared shape.
    pub(crate) fn coerce(self, value: Value) -> Value {
        match (self, value) {
            #[allow(clippy::cast_precision_loss)]
            (ColumnType::Real, Value::Integer(i)) => Value::Real(i as f64),
            (ColumnType::Blob, Value::List(items)) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Integer(b) => u8::try_from(*b).ok(),
                        _ => None,
                    })
                    .collect();
                bytes.map_or(Value::Null, Value::Bytes)
            }
            (_, other) => other,
        }
    }
}

/// Column name to declared type.
pub type Schema = BTreeMap<String, ColumnType>;

/// Persistence used by probes for historical readings.
pub trait Storage: Send + Sync {
    fn insert_row(&self, table: &str, schema: &Schema, values: &Record) -> Result<(), StorageError>;

    /// Every row of `table` in insertion order, projected onto `schema`
    /// (columns absent from a row read as `Null`).
    fn query(&self, table: &str, schema: &Schema) -> Result<Vec<Record>, StorageError>;
}

/// Check `values` against `schema` before it is written.
pub fn validate_row(table: &str, schema: &Schema, values: &Record) -> Result<(), StorageError> {
    for (column, value) in values {
        let declared = schema.get(column).ok_or_else(|| StorageError::UnknownColumn {
            table: table.to_string(),
            column: column.clone(),
        })?;
        if !declared.accepts(value) {
            return Err(StorageError::TypeMismatch {
                table: table.to_string(),
                column: column.clone(),
                expected: *declared,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from([
            ("PRESSURE".to_string(), ColumnType::Real),
            ("timestamp".to_string(), ColumnType::Real),
            ("label".to_string(), ColumnType::Text),
        ])
    }

    #[test]
    fn accepts_matching_row() {
        let row = Record::from([
            ("PRESSURE".to_string(), Value::Real(1013.0)),
            ("timestamp".to_string(), Value::Integer(17)),
            ("label".to_string(), Value::Null),
        ]);
        assert!(validate_row("pressure", &schema(), &row).is_ok());
    }

    #[test]
    fn rejects_wrong_type_and_unknown_column() {
        let wrong = Record::from([("label".to_string(), Value::Real(1.0))]);
        assert!(matches!(
            validate_row("pressure", &schema(), &wrong),
            Err(StorageError::TypeMismatch { .. })
        ));

        let unknown = Record::from([("ALTITUDE".to_string(), Value::Real(1.0))]);
        assert!(matches!(
            validate_row("pressure", &schema(), &unknown),
            Err(StorageError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn blob_lists_coerce_back_to_bytes() {
        let stored = Value::List(vec![Value::Integer(1), Value::Integer(255)]);
        assert_eq!(ColumnType::Blob.coerce(stored), Value::Bytes(vec![1, 255]));
        assert_eq!(ColumnType::Real.coerce(Value::Integer(2)), Value::Real(2.0));
    }
}
