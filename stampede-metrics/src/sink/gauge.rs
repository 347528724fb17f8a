use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::{from_unix_millis, unix_millis, SinkError};
use crate::Sample;

/// The latest sample value, with the running extremes across all samples.
#[derive(Clone, Debug, Default)]
pub struct GaugeSink {
    value: f64,
    min: f64,
    max: f64,
    last: Option<SystemTime>,
    seen: bool,
}

#[derive(Deserialize, Serialize)]
struct GaugeState {
    last_ms: Option<i64>,
    value: f64,
    min: f64,
    max: f64,
    seen: bool,
}

impl GaugeSink {
    /// Adds a sample to the sink.
    pub fn add(&mut self, sample: &Sample) {
        self.last = Some(sample.time);
        self.value = sample.value;
        if !self.seen {
            self.min = sample.value;
            self.max = sample.value;
            self.seen = true;
        } else {
            if sample.value > self.max {
                self.max = sample.value;
            }
            if sample.value < self.min {
                self.min = sample.value;
            }
        }
    }

    /// Whether the sink has observed no samples yet.
    pub fn is_empty(&self) -> bool {
        !self.seen
    }

    /// The latest sample value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The smallest sample value seen, or zero when empty.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// The largest sample value seen, or zero when empty.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// The time of the latest sample, if any.
    pub fn last(&self) -> Option<SystemTime> {
        self.last
    }

    /// The scalar thresholds can reference: the latest `value`.
    pub fn format(&self, _elapsed: Duration) -> HashMap<String, f64> {
        HashMap::from([("value".to_string(), self.value)])
    }

    /// Encodes the current sink state, then resets the latest value and its
    /// timestamp. The extremes survive the drain.
    pub fn drain(&mut self) -> Result<Vec<u8>, SinkError> {
        let state = GaugeState {
            last_ms: self.last.map(unix_millis),
            value: self.value,
            min: self.min,
            max: self.max,
            seen: self.seen,
        };

        self.last = None;
        self.value = 0.0;

        serde_json::to_vec(&state).map_err(SinkError::Encode)
    }

    /// Decodes drained state and accumulates it into this sink: the later
    /// observation wins for `value`, the extremes widen.
    pub fn merge(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let state: GaugeState = serde_json::from_slice(data).map_err(SinkError::Decode)?;
        if !state.seen {
            return Ok(());
        }

        if let Some(ms) = state.last_ms {
            let incoming = from_unix_millis(ms);
            if self.last.map_or(true, |last| incoming > last) {
                self.last = Some(incoming);
                self.value = state.value;
            }
        }

        if !self.seen {
            self.min = state.min;
            self.max = state.max;
            self.seen = true;
        } else {
            if state.max > self.max {
                self.max = state.max;
            }
            if state.min < self.min {
                self.min = state.min;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use approx::assert_relative_eq;

    use super::GaugeSink;
    use crate::test_support::{gauge_metric, sample_at};

    #[test]
    fn test_add_tracks_latest_and_extremes() {
        let metric = gauge_metric("vus");
        let mut sink = GaugeSink::default();
        assert!(sink.is_empty());

        sink.add(&sample_at(&metric, 10.0, 1));
        sink.add(&sample_at(&metric, 3.0, 2));
        sink.add(&sample_at(&metric, 25.0, 3));

        assert!(!sink.is_empty());
        assert_relative_eq!(sink.value(), 25.0);
        assert_relative_eq!(sink.min(), 3.0);
        assert_relative_eq!(sink.max(), 25.0);
        assert_eq!(sink.last(), Some(UNIX_EPOCH + Duration::from_secs(3)));

        let formatted = sink.format(Duration::from_secs(10));
        assert_relative_eq!(formatted["value"], 25.0);
    }

    #[test]
    fn test_all_negative_samples() {
        let metric = gauge_metric("drift");
        let mut sink = GaugeSink::default();
        sink.add(&sample_at(&metric, -5.0, 1));
        sink.add(&sample_at(&metric, -2.0, 2));

        assert_relative_eq!(sink.min(), -5.0);
        assert_relative_eq!(sink.max(), -2.0);
        assert_relative_eq!(sink.value(), -2.0);
    }

    #[test]
    fn test_drain_merge_roundtrip() {
        let metric = gauge_metric("vus");
        let mut sink = GaugeSink::default();
        sink.add(&sample_at(&metric, 10.0, 1));
        sink.add(&sample_at(&metric, 3.0, 2));

        let drained = sink.drain().unwrap();
        assert_eq!(sink.last(), None);
        assert_relative_eq!(sink.value(), 0.0);

        let mut fresh = GaugeSink::default();
        fresh.merge(&drained).unwrap();
        assert!(!fresh.is_empty());
        assert_relative_eq!(fresh.value(), 3.0);
        assert_relative_eq!(fresh.min(), 3.0);
        assert_relative_eq!(fresh.max(), 10.0);
        assert_eq!(fresh.last(), Some(UNIX_EPOCH + Duration::from_secs(2)));
    }

    #[test]
    fn test_merge_later_observation_wins() {
        let metric = gauge_metric("vus");

        let mut early = GaugeSink::default();
        early.add(&sample_at(&metric, 1.0, 1));
        let mut late = GaugeSink::default();
        late.add(&sample_at(&metric, 9.0, 9));

        let drained_early = early.drain().unwrap();
        let drained_late = late.drain().unwrap();

        let mut a = GaugeSink::default();
        a.merge(&drained_early).unwrap();
        a.merge(&drained_late).unwrap();

        let mut b = GaugeSink::default();
        b.merge(&drained_late).unwrap();
        b.merge(&drained_early).unwrap();

        for merged in [&a, &b] {
            assert_relative_eq!(merged.value(), 9.0);
            assert_relative_eq!(merged.min(), 1.0);
            assert_relative_eq!(merged.max(), 9.0);
        }
    }

    #[test]
    fn test_merge_of_empty_drain_stays_empty() {
        let mut empty = GaugeSink::default();
        let drained = empty.drain().unwrap();

        let mut fresh = GaugeSink::default();
        fresh.merge(&drained).unwrap();
        assert!(fresh.is_empty());
    }
}
