//! Fixed-capacity sample buffer with whole-buffer flush
//!
//! Samples are written at the current index. When the index reaches
//! capacity the full contents become a batch and the index returns to 0.
//! There are no partial flushes.

use crate::types::{Batch, BufferedSample, SensorDescriptor};

#[derive(Debug)]
pub struct FlushController {
    probe: String,
    field_names: Vec<String>,
    slots: Vec<Option<BufferedSample>>,
    index: usize,
}

impl FlushController {
    /// `capacity` is clamped to at least one slot.
    pub fn new(probe: impl Into<String>, field_names: Vec<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            probe: probe.into(),
            field_names,
            slots: vec![None; capacity],
            index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Next write position, always in `[0, capacity)`.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Append one sample. Returns the batch when this push filled the buffer.
    ///
    /// `sensor` and `now_secs` describe the batch and are only used on flush.
    pub fn push(
        &mut self,
        sample: BufferedSample,
        sensor: &SensorDescriptor,
        now_secs: f64,
    ) -> Option<Batch> {
        self.slots[self.index] = Some(sample);
        self.index += 1;

        if self.index < self.slots.len() {
            return None;
        }

        self.index = 0;
        let samples: Vec<BufferedSample> = self.slots.iter_mut().filter_map(Option::take).collect();
        Some(Batch {
            probe: self.probe.clone(),
            sensor: sensor.clone(),
            field_names: self.field_names.clone(),
            timestamp: now_secs,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReconciledSample, Sample};

    fn descriptor() -> SensorDescriptor {
        SensorDescriptor {
            name: "test".into(),
            vendor: "bench".into(),
            kind: 0,
            resolution: 0.1,
            power_ma: 0.1,
            max_range: 10.0,
            version: 1,
        }
    }

    fn sample(value: f64) -> BufferedSample {
        #[allow(clippy::cast_possible_truncation)]
        let raw = Sample::new(vec![value as f32], 0, 0);
        BufferedSample {
            reconciled: ReconciledSample {
                sample: raw,
                wall_timestamp_ms: value * 1000.0,
            },
            fields: vec![value],
        }
    }

    #[test]
    fn flushes_exactly_at_capacity() {
        let sensor = descriptor();
        let mut buffer = FlushController::new("light", vec!["LIGHT".into()], 4);
        for v in 0..3 {
            assert!(buffer.push(sample(f64::from(v)), &sensor, 0.0).is_none());
        }
        let batch = buffer.push(sample(3.0), &sensor, 12.0).expect("batch at capacity");
        assert_eq!(buffer.index(), 0);
        let values: Vec<f64> = batch.samples.iter().map(|s| s.fields[0]).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(batch.probe, "light");
        assert!((batch.timestamp - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn one_past_capacity_leaves_one_pending() {
        let sensor = descriptor();
        let mut buffer = FlushController::new("light", vec!["LIGHT".into()], 4);
        let batches: Vec<Batch> = (0..5)
            .filter_map(|v| buffer.push(sample(f64::from(v)), &sensor, 0.0))
            .collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(buffer.index(), 1);
    }
}
