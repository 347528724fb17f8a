use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::{from_unix_millis, unix_millis, SinkError};
use crate::Sample;

/// A cumulative sum of sample values, with the time of the first sample.
#[derive(Clone, Debug, Default)]
pub struct CounterSink {
    value: f64,
    first: Option<SystemTime>,
}

#[derive(Deserialize, Serialize)]
struct CounterState {
    first_ms: Option<i64>,
    value: f64,
}

impl CounterSink {
    /// Adds a sample to the sink.
    pub fn add(&mut self, sample: &Sample) {
        self.value += sample.value;
        if self.first.is_none() {
            self.first = Some(sample.time);
        }
    }

    /// Whether the sink has observed no samples yet.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// The accumulated sum.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The time of the earliest sample seen, if any.
    pub fn first(&self) -> Option<SystemTime> {
        self.first
    }

    /// The scalars thresholds can reference: `count` and the per-second
    /// `rate` over the elapsed test duration.
    pub fn format(&self, elapsed: Duration) -> HashMap<String, f64> {
        let rate = if elapsed.is_zero() { 0.0 } else { self.value / elapsed.as_secs_f64() };
        HashMap::from([("count".to_string(), self.value), ("rate".to_string(), rate)])
    }

    /// Encodes the current sink state, then resets the sum and the
    /// first-seen timestamp.
    pub fn drain(&mut self) -> Result<Vec<u8>, SinkError> {
        let state =
            CounterState { first_ms: self.first.map(unix_millis), value: self.value };
        self.value = 0.0;
        self.first = None;
        serde_json::to_vec(&state).map_err(SinkError::Encode)
    }

    /// Decodes drained state and accumulates it into this sink, keeping the
    /// earliest first-seen timestamp.
    pub fn merge(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let state: CounterState = serde_json::from_slice(data).map_err(SinkError::Decode)?;

        self.value += state.value;
        if let Some(ms) = state.first_ms {
            let incoming = from_unix_millis(ms);
            if self.first.map_or(true, |first| incoming < first) {
                self.first = Some(incoming);
            }
        }
        Ok(())
    }
}
