//! Channel layouts for continuous probes
//!
//! A [`ChannelSpec`] names a probe's table, its field columns and how
//! derived fields are computed from the raw value vector at push time.

use crate::config::defaults::PRESSURE_STANDARD_ATMOSPHERE;
use crate::storage::{ColumnType, Schema};
use crate::types::ROW_TIMESTAMP_COLUMN;

/// Altitude (m) for a pressure reading (hPa), international barometric
/// formula against the standard atmosphere.
pub fn pressure_altitude(pressure_hpa: f64) -> f64 {
    44_330.0 * (1.0 - (pressure_hpa / PRESSURE_STANDARD_ATMOSPHERE).powf(1.0 / 5.255))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Raw values map one-to-one onto the fields
    Identity,
    /// `[PRESSURE] -> [PRESSURE, ALTITUDE]`
    PressureAltitude,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: String,
    pub fields: Vec<String>,
    pub derivation: Derivation,
}

impl ChannelSpec {
    pub fn pressure() -> Self {
        Self {
            name: "pressure".into(),
            table: "pressure".into(),
            fields: vec!["PRESSURE".into(), "ALTITUDE".into()],
            derivation: Derivation::PressureAltitude,
        }
    }

    /// A single-valued channel; the field is the upper-cased name.
    pub fn scalar(name: &str) -> Self {
        Self::vector(name, &[name.to_ascii_uppercase().as_str()])
    }

    pub fn vector(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: name.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            derivation: Derivation::Identity,
        }
    }

    /// Layout for a configured probe name.
    pub fn for_probe(name: &str) -> Self {
        match name {
            "pressure" => Self::pressure(),
            "accelerometer" | "gyroscope" | "magnetic_field" => Self::vector(name, &["X", "Y", "Z"]),
            _ => Self::scalar(name),
        }
    }

    /// Field values for one sample, raw then derived. Missing raw values
    /// read as NaN so every row has the full width.
    pub fn derive(&self, values: &[f32]) -> Vec<f64> {
        let raw = |i: usize| values.get(i).copied().map_or(f64::NAN, f64::from);
        match self.derivation {
            Derivation::Identity => (0..self.fields.len()).map(raw).collect(),
            Derivation::PressureAltitude => {
                let pressure = raw(0);
                vec![pressure, pressure_altitude(pressure)]
            }
        }
    }

    /// Persisted row schema: every field plus the row timestamp.
    pub fn schema(&self) -> Schema {
        self.fields
            .iter()
            .map(|f| (f.clone(), ColumnType::Real))
            .chain(std::iter::once((ROW_TIMESTAMP_COLUMN.to_string(), ColumnType::Real)))
            .collect()
    }

    pub fn enabled_key(&self) -> String {
        format!("probes.{}.enabled", self.name)
    }

    pub fn frequency_key(&self) -> String {
        format!("probes.{}.frequency", self.name)
    }

    pub fn threshold_key(&self) -> String {
        format!("probes.{}.threshold", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sea_level_is_zero_altitude() {
        assert!(pressure_altitude(PRESSURE_STANDARD_ATMOSPHERE).abs() < 1e-9);
        let high = pressure_altitude(900.0);
        assert!(high > 980.0 && high < 1000.0, "got {high}");
    }

    #[test]
    fn pressure_derives_altitude_once() {
        let spec = ChannelSpec::pressure();
        let fields = spec.derive(&[1013.25]);
        assert_eq!(fields.len(), 2);
        assert!(fields[1].abs() < 1e-6);
        assert!(spec.schema().contains_key("ALTITUDE"));
        assert!(spec.schema().contains_key(ROW_TIMESTAMP_COLUMN));
    }

    #[test]
    fn identity_pads_missing_axes() {
        let spec = ChannelSpec::for_probe("accelerometer");
        let fields = spec.derive(&[0.1, 9.8]);
        assert_eq!(fields.len(), 3);
        assert!(fields[2].is_nan());
        assert_eq!(ChannelSpec::scalar("light").fields, vec!["LIGHT".to_string()]);
    }
}
