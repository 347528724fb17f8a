//! Metric types and aggregation for the stampede load-testing tool.
//!
//! During a test run, virtual users emit a stream of timestamped samples.
//! This crate holds everything needed to make sense of that stream:
//!
//! - [`Registry`] — name-validated, type-checked creation and lookup of
//!   [`Metric`]s, and the root all [`TagSet`]s branch out from.
//! - [`Sink`] — the per-metric running aggregate, one variant per
//!   [`MetricKind`]: counters, gauges, rates, and percentile-capable trends.
//! - [`Thresholds`] — boolean predicates over a sink's aggregates, evaluated
//!   periodically by the metrics engine while the test runs.
//! - [`selector`] — parsing of sub-metric selectors like
//!   `http_reqs{status:500}`, which derive a tag-filtered child metric from
//!   a parent.
//!
//! The engine crate drives these types; nothing here spawns threads. Sinks
//! are deliberately not synchronized — the engine guards each one with its
//! owning metric's lock.

mod metric;
mod registry;
mod sample;
pub mod selector;
mod sink;
mod tags;
mod thresholds;
mod types;

pub use metric::{Metric, Submetric};
pub use registry::{Registry, RegistryError};
pub use sample::{Sample, SampleContainer, Samples};
pub use selector::SelectorError;
pub use sink::{CounterSink, GaugeSink, RateSink, Sink, SinkError, TrendSink};
pub use tags::TagSet;
pub use thresholds::{
    AggregationMethod, Operator, Threshold, ThresholdError, ThresholdExpression,
    ThresholdParseError, Thresholds,
};
pub use types::{MetricKind, ParseEnumError, ValueType};

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::{Duration, UNIX_EPOCH};

    use crate::{Metric, MetricKind, Registry, Sample, TagSet, ValueType};

    pub(crate) fn metric(name: &str, kind: MetricKind) -> Metric {
        Registry::new().must_new_metric(name, kind, ValueType::Default)
    }

    pub(crate) fn counter_metric(name: &str) -> Metric {
        metric(name, MetricKind::Counter)
    }

    pub(crate) fn gauge_metric(name: &str) -> Metric {
        metric(name, MetricKind::Gauge)
    }

    pub(crate) fn rate_metric(name: &str) -> Metric {
        metric(name, MetricKind::Rate)
    }

    pub(crate) fn trend_metric(name: &str) -> Metric {
        metric(name, MetricKind::Trend)
    }

    /// A sample of the given value, `at_secs` past the epoch, with no tags.
    pub(crate) fn sample_at(metric: &Metric, value: f64, at_secs: u64) -> Sample {
        Sample {
            metric: metric.clone(),
            time: UNIX_EPOCH + Duration::from_secs(at_secs),
            value,
            tags: TagSet::new_root(),
        }
    }
}
