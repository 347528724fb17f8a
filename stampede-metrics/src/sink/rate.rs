use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SinkError;
use crate::Sample;

/// The ratio of non-zero samples over all samples.
#[derive(Clone, Debug, Default)]
pub struct RateSink {
    trues: i64,
    total: i64,
}

#[derive(Deserialize, Serialize)]
struct RateState {
    trues: i64,
    total: i64,
}

impl RateSink {
    /// Adds a sample to the sink. Any non-zero value counts as a success.
    pub fn add(&mut self, sample: &Sample) {
        self.total += 1;
        if sample.value != 0.0 {
            self.trues += 1;
        }
    }

    /// Whether the sink has observed no samples yet.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// How many samples were non-zero.
    pub fn trues(&self) -> i64 {
        self.trues
    }

    /// How many samples were observed in total.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// The scalar thresholds can reference: the success `rate` in `[0, 1]`.
    pub fn format(&self, _elapsed: Duration) -> HashMap<String, f64> {
        let rate =
            if self.total > 0 { self.trues as f64 / self.total as f64 } else { 0.0 };
        HashMap::from([("rate".to_string(), rate)])
    }

    /// Encodes the current sink state, then resets both counts.
    pub fn drain(&mut self) -> Result<Vec<u8>, SinkError> {
        let state = RateState { trues: self.trues, total: self.total };
        self.trues = 0;
        self.total = 0;
        serde_json::to_vec(&state).map_err(SinkError::Encode)
    }

    /// Decodes drained state and adds both counts into this sink.
    pub fn merge(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let state: RateState = serde_json::from_slice(data).map_err(SinkError::Decode)?;
        self.trues += state.trues;
        self.total += state.total;
        Ok(())
    }
}
