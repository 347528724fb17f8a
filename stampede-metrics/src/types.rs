use std::fmt;
use std::str::FromStr;

/// Metric kind.
///
/// Defines the kind, or type, of a metric, which decides the aggregation sink
/// its samples feed:
/// - counters (cumulative sums)
/// - gauges (latest value, with running extremes)
/// - rates (ratio of non-zero samples)
/// - trends (full value series, with percentiles)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricKind {
    /// Counter kind.
    Counter,
    /// Gauge kind.
    Gauge,
    /// Rate kind.
    Rate,
    /// Trend kind.
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(s)
    }
}

/// The error returned when parsing a [`MetricKind`] or [`ValueType`] from a
/// string fails.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown {what} '{input}'")]
pub struct ParseEnumError {
    what: &'static str,
    input: String,
}

impl FromStr for MetricKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "rate" => Ok(MetricKind::Rate),
            "trend" => Ok(MetricKind::Trend),
            _ => Err(ParseEnumError { what: "metric kind", input: s.to_string() }),
        }
    }
}

/// The type of values a metric contains.
///
/// This does not affect aggregation, only how the values are meant to be
/// rendered: plain numbers, durations, or byte amounts.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum ValueType {
    /// A plain number.
    #[default]
    Default,
    /// A duration, in milliseconds.
    Time,
    /// An amount of data, in bytes.
    Data,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Default => "default",
            ValueType::Time => "time",
            ValueType::Data => "data",
        };
        f.write_str(s)
    }
}

impl FromStr for ValueType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ValueType::Default),
            "time" => Ok(ValueType::Time),
            "data" => Ok(ValueType::Data),
            _ => Err(ParseEnumError { what: "value type", input: s.to_string() }),
        }
    }
}
