//! Threshold expressions over sink aggregates.
//!
//! A threshold is a boolean predicate over the scalars a sink can report,
//! e.g. `p(95) < 500`, `rate > 0.9`, or `count > 1000`. Expressions are
//! parsed when a threshold is created, so malformed input fails at config
//! time; running a parsed threshold against a sink cannot fail unless the
//! aggregation method does not fit the sink.

use std::fmt;
use std::time::Duration;

use crate::{MetricKind, Sink};

/// Errors from parsing or validating a threshold expression.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ThresholdParseError {
    /// The expression did not scan as `<aggregation> <operator> <value>`.
    #[error("malformed threshold expression '{0}'")]
    Malformed(String),

    /// The aggregation method is not one of the supported tokens.
    #[error("unknown aggregation method '{0}'")]
    UnknownMethod(String),

    /// A `p(..)` method whose argument is not a percentile in `[0, 100]`.
    #[error("malformed percentile '{0}'")]
    MalformedPercentile(String),

    /// The right-hand side is not a number.
    #[error("invalid threshold value '{0}'")]
    InvalidValue(String),

    /// The aggregation method cannot be resolved against the metric's sink.
    #[error("aggregation method '{method}' is not supported for {kind} metrics")]
    MethodKindMismatch {
        /// The rejected method token.
        method: String,
        /// The kind of the metric the threshold was attached to.
        kind: MetricKind,
    },
}

/// Errors from evaluating a threshold against a sink.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    /// The sink does not report the requested aggregation.
    #[error("sink reports no '{0}' aggregation")]
    UnsupportedAggregation(String),
}

/// The left-hand side of a threshold expression: which scalar of the sink to
/// compare.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AggregationMethod {
    /// Counter: the accumulated sum.
    Count,
    /// Counter: per-second rate. Rate: success ratio.
    Rate,
    /// Gauge: the latest value.
    Value,
    /// Trend: the mean.
    Avg,
    /// Trend: the minimum.
    Min,
    /// Trend: the median.
    Med,
    /// Trend: the maximum.
    Max,
    /// Trend: an arbitrary percentile, argument in `[0, 100]`.
    Percentile(f64),
}

impl AggregationMethod {
    fn parse(token: &str) -> Result<AggregationMethod, ThresholdParseError> {
        match token {
            "count" => Ok(AggregationMethod::Count),
            "rate" => Ok(AggregationMethod::Rate),
            "value" => Ok(AggregationMethod::Value),
            "avg" => Ok(AggregationMethod::Avg),
            "min" => Ok(AggregationMethod::Min),
            "med" => Ok(AggregationMethod::Med),
            "max" => Ok(AggregationMethod::Max),
            _ => {
                let inner = token
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdParseError::UnknownMethod(token.to_string()))?;
                let pct: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| ThresholdParseError::MalformedPercentile(token.to_string()))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(ThresholdParseError::MalformedPercentile(token.to_string()));
                }
                Ok(AggregationMethod::Percentile(pct))
            }
        }
    }

    fn supports(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => {
                matches!(self, AggregationMethod::Count | AggregationMethod::Rate)
            }
            MetricKind::Gauge => matches!(self, AggregationMethod::Value),
            MetricKind::Rate => matches!(self, AggregationMethod::Rate),
            MetricKind::Trend => matches!(
                self,
                AggregationMethod::Avg
                    | AggregationMethod::Min
                    | AggregationMethod::Med
                    | AggregationMethod::Max
                    | AggregationMethod::Percentile(_)
            ),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMethod::Count => f.write_str("count"),
            AggregationMethod::Rate => f.write_str("rate"),
            AggregationMethod::Value => f.write_str("value"),
            AggregationMethod::Avg => f.write_str("avg"),
            AggregationMethod::Min => f.write_str("min"),
            AggregationMethod::Med => f.write_str("med"),
            AggregationMethod::Max => f.write_str("max"),
            AggregationMethod::Percentile(pct) => write!(f, "p({pct})"),
        }
    }
}

/// The comparison operator of a threshold expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `==` (and its alias `===`)
    Equal,
    /// `!=`
    NotEqual,
}

impl Operator {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Greater => lhs > rhs,
            Operator::GreaterEq => lhs >= rhs,
            Operator::Less => lhs < rhs,
            Operator::LessEq => lhs <= rhs,
            Operator::Equal => lhs == rhs,
            Operator::NotEqual => lhs != rhs,
        }
    }
}

/// A parsed threshold expression: `<aggregation> <operator> <value>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdExpression {
    method: AggregationMethod,
    operator: Operator,
    value: f64,
}

impl ThresholdExpression {
    /// Parses an expression such as `p(95) < 500` or `rate > 0.9`.
    pub fn parse(source: &str) -> Result<ThresholdExpression, ThresholdParseError> {
        let split = source
            .char_indices()
            .find(|(_, c)| matches!(c, '>' | '<' | '=' | '!'))
            .map(|(i, _)| i)
            .ok_or_else(|| ThresholdParseError::Malformed(source.to_string()))?;

        let (method_token, rest) = source.split_at(split);
        let (operator, rest) = if let Some(rest) = rest.strip_prefix(">=") {
            (Operator::GreaterEq, rest)
        } else if let Some(rest) = rest.strip_prefix("<=") {
            (Operator::LessEq, rest)
        } else if let Some(rest) = rest.strip_prefix("===") {
            (Operator::Equal, rest)
        } else if let Some(rest) = rest.strip_prefix("==") {
            (Operator::Equal, rest)
        } else if let Some(rest) = rest.strip_prefix("!=") {
            (Operator::NotEqual, rest)
        } else if let Some(rest) = rest.strip_prefix('>') {
            (Operator::Greater, rest)
        } else if let Some(rest) = rest.strip_prefix('<') {
            (Operator::Less, rest)
        } else {
            return Err(ThresholdParseError::Malformed(source.to_string()));
        };

        let method = AggregationMethod::parse(method_token.trim())?;
        let value_token = rest.trim();
        let value: f64 = value_token
            .parse()
            .map_err(|_| ThresholdParseError::InvalidValue(value_token.to_string()))?;

        Ok(ThresholdExpression { method, operator, value })
    }

    /// The aggregation the expression compares.
    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    fn resolve(&self, sink: &mut Sink, elapsed: Duration) -> Result<f64, ThresholdError> {
        if let AggregationMethod::Percentile(pct) = self.method {
            return match sink {
                Sink::Trend(trend) => Ok(trend.p(pct / 100.0)),
                _ => Err(ThresholdError::UnsupportedAggregation(self.method.to_string())),
            };
        }

        sink.format(elapsed)
            .get(&self.method.to_string())
            .copied()
            .ok_or_else(|| ThresholdError::UnsupportedAggregation(self.method.to_string()))
    }
}

/// One configured threshold for a metric.
#[derive(Clone, Debug)]
pub struct Threshold {
    source: String,
    parsed: ThresholdExpression,
    abort_on_fail: bool,
    abort_grace_period: Option<Duration>,
    last_failed: bool,
}

impl Threshold {
    /// Parses a threshold from its expression source. `abort_on_fail` makes a
    /// failure abort the whole test run; the grace period suppresses
    /// evaluation until the given test duration has elapsed.
    pub fn new(
        source: &str,
        abort_on_fail: bool,
        abort_grace_period: Option<Duration>,
    ) -> Result<Threshold, ThresholdParseError> {
        Ok(Threshold {
            source: source.to_string(),
            parsed: ThresholdExpression::parse(source)?,
            abort_on_fail,
            abort_grace_period,
            last_failed: false,
        })
    }

    /// The expression source as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether a failure of this threshold aborts the test.
    pub fn abort_on_fail(&self) -> bool {
        self.abort_on_fail
    }

    /// Whether the threshold failed the last time it was evaluated.
    pub fn last_failed(&self) -> bool {
        self.last_failed
    }

    fn run(&mut self, sink: &mut Sink, elapsed: Duration) -> Result<bool, ThresholdError> {
        if let Some(grace) = self.abort_grace_period {
            if elapsed < grace {
                self.last_failed = false;
                return Ok(true);
            }
        }

        let lhs = self.parsed.resolve(sink, elapsed)?;
        let passed = self.parsed.operator.apply(lhs, self.parsed.value);
        self.last_failed = !passed;
        Ok(passed)
    }
}

/// All thresholds configured for one metric, plus the sticky abort state.
#[derive(Clone, Debug, Default)]
pub struct Thresholds {
    thresholds: Vec<Threshold>,
    abort: bool,
}

impl Thresholds {
    /// Wraps a list of parsed thresholds.
    pub fn new(thresholds: Vec<Threshold>) -> Thresholds {
        Thresholds { thresholds, abort: false }
    }

    /// The configured thresholds.
    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Whether no thresholds are configured.
    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Whether a failing abort-on-fail threshold was seen by a previous
    /// [`run`](Thresholds::run).
    pub fn abort(&self) -> bool {
        self.abort
    }

    /// Checks that every threshold's aggregation method can be resolved
    /// against a sink of the given kind.
    pub fn validate(&self, kind: MetricKind) -> Result<(), ThresholdParseError> {
        for threshold in &self.thresholds {
            let method = threshold.parsed.method;
            if !method.supports(kind) {
                return Err(ThresholdParseError::MethodKindMismatch {
                    method: method.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Evaluates every threshold against the sink at the given elapsed test
    /// duration. The result is the conjunction of the individual outcomes.
    pub fn run(&mut self, sink: &mut Sink, elapsed: Duration) -> Result<bool, ThresholdError> {
        let mut passed = true;
        for threshold in &mut self.thresholds {
            let ok = threshold.run(sink, elapsed)?;
            passed = passed && ok;
            if !ok && threshold.abort_on_fail {
                self.abort = true;
            }
        }
        Ok(passed)
    }
}
