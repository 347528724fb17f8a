use std::collections::HashMap;
use std::time::Duration;

use super::SinkError;
use crate::Sample;

/// The full series of sample values, kept for exact percentiles.
///
/// Values are sorted lazily: an [`add`](TrendSink::add) only appends, and the
/// first percentile read afterwards sorts the series once. Percentile reads
/// are meant to happen during quiescent snapshots (callers hold the owning
/// lock), not under write contention.
#[derive(Clone, Debug, Default)]
pub struct TrendSink {
    values: Vec<f64>,
    sorted: bool,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl TrendSink {
    /// Adds a sample to the sink.
    pub fn add(&mut self, sample: &Sample) {
        self.record(sample.value);
    }

    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            if value > self.max {
                self.max = value;
            }
            if value < self.min {
                self.min = value;
            }
        }

        self.values.push(value);
        self.sorted = false;
        self.count += 1;
        self.sum += value;
    }

    /// Whether the sink has observed no samples yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Calculates the given percentile, `pct` in `[0, 1]`, by linear
    /// interpolation over the sorted values. Returns 0 when empty.
    pub fn p(&mut self, pct: f64) -> f64 {
        match self.count {
            0 => 0.0,
            1 => self.values[0],
            _ => {
                if !self.sorted {
                    self.values.sort_unstable_by(f64::total_cmp);
                    self.sorted = true;
                }

                // If the percentile lands between two values, interpolate
                // linearly between them.
                let i = pct * (self.count - 1) as f64;
                let j = self.values[i.floor() as usize];
                let k = self.values[i.ceil() as usize];
                j + (k - j) * (i - i.floor())
            }
        }
    }

    /// The smallest value seen, or zero when empty.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// The largest value seen, or zero when empty.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// The number of recorded values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The mean value, or zero when empty.
    pub fn avg(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// The sum of all recorded values.
    pub fn total(&self) -> f64 {
        self.sum
    }

    /// The scalars thresholds can reference: `min`, `max`, `avg`, `med`,
    /// `p(90)`, and `p(95)`.
    pub fn format(&mut self, _elapsed: Duration) -> HashMap<String, f64> {
        HashMap::from([
            ("min".to_string(), self.min()),
            ("max".to_string(), self.max()),
            ("avg".to_string(), self.avg()),
            ("med".to_string(), self.p(0.5)),
            ("p(90)".to_string(), self.p(0.90)),
            ("p(95)".to_string(), self.p(0.95)),
        ])
    }

    /// Encodes the recorded values, then resets the sink to a fresh empty
    /// state.
    pub fn drain(&mut self) -> Result<Vec<u8>, SinkError> {
        let encoded = serde_json::to_vec(&self.values).map_err(SinkError::Encode)?;
        *self = TrendSink::default();
        Ok(encoded)
    }

    /// Decodes drained values and records each into this sink.
    pub fn merge(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let values: Vec<f64> = serde_json::from_slice(data).map_err(SinkError::Decode)?;
        for value in values {
            self.record(value);
        }
        Ok(())
    }
}
