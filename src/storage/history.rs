//! Probe Value History Storage
//!
//! Persists probe rows to Sled DB, one tree per table. Keys are the row's
//! timestamp in milliseconds (big-endian) followed by a database-unique id,
//! so iteration is chronological and same-millisecond rows never collide.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::{validate_row, Schema, Storage, StorageError};
use crate::types::{Record, Value, ROW_TIMESTAMP_COLUMN};

#[derive(Clone)]
pub struct SledStorage {
    db: Arc<sled::Db>,
}

impl SledStorage {
    /// Open or create the database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "Probe storage opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn row_key(&self, values: &Record) -> Result<[u8; 16], StorageError> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = values
            .get(ROW_TIMESTAMP_COLUMN)
            .and_then(Value::as_f64)
            .map_or(0, |secs| (secs * 1000.0).max(0.0) as u64);
        let id = self.db.generate_id()?;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&millis.to_be_bytes());
        key[8..].copy_from_slice(&id.to_be_bytes());
        Ok(key)
    }

    /// Rows stored in `table`.
    pub fn count(&self, table: &str) -> Result<usize, StorageError> {
        Ok(self.db.open_tree(table)?.len())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Storage for SledStorage {
    fn insert_row(&self, table: &str, schema: &Schema, values: &Record) -> Result<(), StorageError> {
        validate_row(table, schema, values)?;

        let key = self.row_key(values)?;
        let json: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect();
        let bytes = serde_json::to_vec(&json)?;

        // No flush per write; sled flushes in the background.
        self.db.open_tree(table)?.insert(key, bytes)?;
        Ok(())
    }

    fn query(&self, table: &str, schema: &Schema) -> Result<Vec<Record>, StorageError> {
        let tree = self.db.open_tree(table)?;
        let mut rows = Vec::with_capacity(tree.len());

        for item in tree.iter() {
            let (_key, bytes) = item?;
            let stored: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)?;
            let row: Record = schema
                .iter()
                .map(|(column, declared)| {
                    let value = stored.get(column).map_or(Value::Null, Value::from_json);
                    (column.clone(), declared.coerce(value))
                })
                .collect();
            rows.push(row);
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnType;

    fn schema() -> Schema {
        Schema::from([
            ("PRESSURE".to_string(), ColumnType::Real),
            ("ALTITUDE".to_string(), ColumnType::Real),
            (ROW_TIMESTAMP_COLUMN.to_string(), ColumnType::Real),
        ])
    }

    fn row(pressure: f64, ts: f64) -> Record {
        Record::from([
            ("PRESSURE".to_string(), Value::Real(pressure)),
            (ROW_TIMESTAMP_COLUMN.to_string(), Value::Real(ts)),
        ])
    }

    #[test]
    fn rows_come_back_in_time_order() {
        let storage = SledStorage::temporary().expect("temp db");
        storage.insert_row("pressure", &schema(), &row(1002.0, 20.0)).expect("insert");
        storage.insert_row("pressure", &schema(), &row(1001.0, 10.0)).expect("insert");
        storage.insert_row("pressure", &schema(), &row(1003.0, 20.0)).expect("insert");

        let rows = storage.query("pressure", &schema()).expect("query");
        let pressures: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.get("PRESSURE").and_then(Value::as_f64))
            .collect();
        assert_eq!(pressures, vec![1001.0, 1002.0, 1003.0]);
        // Declared but never written
        assert_eq!(rows[0].get("ALTITUDE"), Some(&Value::Null));
    }

    #[test]
    fn tables_are_independent() {
        let storage = SledStorage::temporary().expect("temp db");
        storage.insert_row("pressure", &schema(), &row(1.0, 1.0)).expect("insert");
        assert_eq!(storage.count("pressure").expect("count"), 1);
        assert_eq!(storage.count("light").expect("count"), 0);
    }

    #[test]
    fn invalid_rows_are_not_written() {
        let storage = SledStorage::temporary().expect("temp db");
        let bad = Record::from([("PRESSURE".to_string(), Value::Text("high".into()))]);
        assert!(storage.insert_row("pressure", &schema(), &bad).is_err());
        assert_eq!(storage.count("pressure").expect("count"), 0);
    }

    #[test]
    fn flushed_rows_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("probe_values.db");
        {
            let storage = SledStorage::open(&path).expect("open");
            storage.insert_row("pressure", &schema(), &row(1.0, 1.0)).expect("insert");
            storage.flush().expect("flush");
        }
        let reopened = SledStorage::open(&path).expect("reopen");
        assert_eq!(reopened.count("pressure").expect("count"), 1);
    }
}
