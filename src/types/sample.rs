//! Sensor sample, batch and event types

use serde::{Deserialize, Serialize};

use super::{Record, Value};

/// Payload field holding the emitting probe's name.
pub const PROBE_KEY: &str = "PROBE";
/// Payload field holding the batch / event wall-clock time (seconds).
pub const TIMESTAMP_KEY: &str = "TIMESTAMP";
/// Payload field holding per-sample wall-clock times (milliseconds).
pub const EVENT_TIMESTAMP_KEY: &str = "EVENT_TIMESTAMP";
/// Payload field holding per-sample accuracy codes.
pub const ACCURACY_KEY: &str = "ACCURACY";
/// Payload field holding the sensor metadata record.
pub const SENSOR_KEY: &str = "SENSOR";
/// Column name used for the row timestamp in persisted tables (seconds).
pub const ROW_TIMESTAMP_COLUMN: &str = "timestamp";

/// A raw reading as delivered by a sample source. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub values: Vec<f32>,
    /// Nanoseconds on the sensor's clock (usually time since boot)
    pub sensor_timestamp: u64,
    pub accuracy: i32,
}

impl Sample {
    pub fn new(values: Vec<f32>, sensor_timestamp: u64, accuracy: i32) -> Self {
        Self {
            values,
            sensor_timestamp,
            accuracy,
        }
    }

    /// The value threshold filtering is applied to.
    pub fn primary(&self) -> Option<f64> {
        self.values.first().copied().map(f64::from)
    }
}

/// A sample with its timestamp converted to wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSample {
    pub sample: Sample,
    pub wall_timestamp_ms: f64,
}

/// One buffered row: the reconciled sample plus its field values
/// (raw and derived) in the probe's field order.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSample {
    pub reconciled: ReconciledSample,
    pub fields: Vec<f64>,
}

/// Static metadata describing the physical sensor behind a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    pub vendor: String,
    pub kind: i32,
    pub resolution: f32,
    /// Power draw in mA
    pub power_ma: f32,
    pub max_range: f32,
    pub version: i32,
}

impl SensorDescriptor {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("NAME".into(), self.name.clone().into());
        record.insert("VENDOR".into(), self.vendor.clone().into());
        record.insert("TYPE".into(), self.kind.into());
        record.insert("RESOLUTION".into(), self.resolution.into());
        record.insert("POWER".into(), self.power_ma.into());
        record.insert("MAXIMUM_RANGE".into(), self.max_range.into());
        record.insert("VERSION".into(), self.version.into());
        record
    }
}

/// The full contents of a probe buffer at flush time.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub probe: String,
    pub sensor: SensorDescriptor,
    pub field_names: Vec<String>,
    /// Wall-clock time of the flush, seconds since the epoch
    pub timestamp: f64,
    pub samples: Vec<BufferedSample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Columnar payload sent to the output sinks.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(PROBE_KEY.into(), self.probe.clone().into());
        record.insert(SENSOR_KEY.into(), Value::Record(self.sensor.to_record()));
        record.insert(TIMESTAMP_KEY.into(), self.timestamp.into());
        record.insert(
            EVENT_TIMESTAMP_KEY.into(),
            self.samples
                .iter()
                .map(|s| Value::Real(s.reconciled.wall_timestamp_ms))
                .collect(),
        );
        record.insert(
            ACCURACY_KEY.into(),
            self.samples
                .iter()
                .map(|s| Value::from(s.reconciled.sample.accuracy))
                .collect(),
        );
        for (index, name) in self.field_names.iter().enumerate() {
            record.insert(
                name.clone(),
                self.samples
                    .iter()
                    .map(|s| s.fields.get(index).copied().map_or(Value::Null, Value::Real))
                    .collect(),
            );
        }
        record
    }

    /// Decompose into one persisted row per sample.
    pub fn rows(&self) -> impl Iterator<Item = Record> + '_ {
        self.samples.iter().map(move |sample| {
            let mut row = Record::new();
            for (name, value) in self.field_names.iter().zip(&sample.fields) {
                row.insert(name.clone(), Value::Real(*value));
            }
            row.insert(
                ROW_TIMESTAMP_COLUMN.into(),
                Value::Real(sample.reconciled.wall_timestamp_ms / 1000.0),
            );
            row
        })
    }

    /// Field values of the newest sample, keyed by field name.
    pub fn latest_fields(&self) -> Record {
        let mut record = Record::new();
        if let Some(last) = self.samples.last() {
            for (name, value) in self.field_names.iter().zip(&last.fields) {
                record.insert(name.clone(), Value::Real(*value));
            }
        }
        record
    }
}

/// Data arriving from a probe, routed to the trigger engine and the models.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub source: String,
    /// Wall-clock time of the event, seconds since the epoch
    pub timestamp: f64,
    pub values: Record,
}
