//! Aggregation sinks, one per metric kind.
//!
//! A sink is the running aggregate for one metric. Every variant supports the
//! same contract: accept samples, report emptiness, format the named scalars
//! thresholds evaluate against, and drain/merge a compact encoding of its
//! state for aggregator-side shipping between partitions.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod counter;
mod gauge;
mod rate;
mod trend;

pub use counter::CounterSink;
pub use gauge::GaugeSink;
pub use rate::RateSink;
pub use trend::TrendSink;

use crate::{MetricKind, Sample};

/// Errors that can occur while draining or merging sink state.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Encoding the sink state did not succeed.
    #[error("failed to encode sink state")]
    Encode(#[source] serde_json::Error),

    /// The drained bytes did not decode as this sink's state.
    #[error("failed to decode sink state")]
    Decode(#[source] serde_json::Error),
}

/// The running aggregate for one metric, discriminated by kind.
///
/// Snapshot copies are plain values: `Clone` a sink under its owner's lock
/// and the copy is safe to read without further locking.
#[derive(Clone, Debug)]
pub enum Sink {
    /// A cumulative sum.
    Counter(CounterSink),
    /// The latest value, with running extremes.
    Gauge(GaugeSink),
    /// The ratio of non-zero samples.
    Rate(RateSink),
    /// The full value series, with percentiles.
    Trend(TrendSink),
}

impl Sink {
    /// Creates the sink matching the given metric kind.
    pub fn new(kind: MetricKind) -> Sink {
        match kind {
            MetricKind::Counter => Sink::Counter(CounterSink::default()),
            MetricKind::Gauge => Sink::Gauge(GaugeSink::default()),
            MetricKind::Rate => Sink::Rate(RateSink::default()),
            MetricKind::Trend => Sink::Trend(TrendSink::default()),
        }
    }

    /// The metric kind this sink aggregates for.
    pub fn kind(&self) -> MetricKind {
        match self {
            Sink::Counter(_) => MetricKind::Counter,
            Sink::Gauge(_) => MetricKind::Gauge,
            Sink::Rate(_) => MetricKind::Rate,
            Sink::Trend(_) => MetricKind::Trend,
        }
    }

    /// Adds a sample to the sink.
    pub fn add(&mut self, sample: &Sample) {
        match self {
            Sink::Counter(sink) => sink.add(sample),
            Sink::Gauge(sink) => sink.add(sample),
            Sink::Rate(sink) => sink.add(sample),
            Sink::Trend(sink) => sink.add(sample),
        }
    }

    /// Whether the sink has observed no samples yet.
    pub fn is_empty(&self) -> bool {
        match self {
            Sink::Counter(sink) => sink.is_empty(),
            Sink::Gauge(sink) => sink.is_empty(),
            Sink::Rate(sink) => sink.is_empty(),
            Sink::Trend(sink) => sink.is_empty(),
        }
    }

    /// The named scalars thresholds can reference, at the given elapsed test
    /// duration.
    pub fn format(&mut self, elapsed: Duration) -> HashMap<String, f64> {
        match self {
            Sink::Counter(sink) => sink.format(elapsed),
            Sink::Gauge(sink) => sink.format(elapsed),
            Sink::Rate(sink) => sink.format(elapsed),
            Sink::Trend(sink) => sink.format(elapsed),
        }
    }

    /// Encodes the current sink state and resets it.
    pub fn drain(&mut self) -> Result<Vec<u8>, SinkError> {
        match self {
            Sink::Counter(sink) => sink.drain(),
            Sink::Gauge(sink) => sink.drain(),
            Sink::Rate(sink) => sink.drain(),
            Sink::Trend(sink) => sink.drain(),
        }
    }

    /// Decodes previously drained state and accumulates it into this sink.
    pub fn merge(&mut self, data: &[u8]) -> Result<(), SinkError> {
        match self {
            Sink::Counter(sink) => sink.merge(data),
            Sink::Gauge(sink) => sink.merge(data),
            Sink::Rate(sink) => sink.merge(data),
            Sink::Trend(sink) => sink.merge(data),
        }
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(err) => -(err.duration().as_millis() as i64),
    }
}

fn from_unix_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::{from_unix_millis, unix_millis, Sink};
    use crate::MetricKind;

    #[test]
    fn test_new_by_kind() {
        let kinds =
            [MetricKind::Counter, MetricKind::Gauge, MetricKind::Rate, MetricKind::Trend];
        for kind in kinds {
            let sink = Sink::new(kind);
            assert_eq!(sink.kind(), kind);
            assert!(sink.is_empty());
        }
    }

    #[test]
    fn test_unix_millis_roundtrip() {
        let t = UNIX_EPOCH + Duration::from_millis(1_698_765_432_100);
        assert_eq!(from_unix_millis(unix_millis(t)), t);

        let before_epoch = UNIX_EPOCH - Duration::from_millis(1500);
        assert_eq!(from_unix_millis(unix_millis(before_epoch)), before_epoch);
    }
}
