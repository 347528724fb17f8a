//! The metrics engine of the stampede load-testing tool.
//!
//! While a test runs, many concurrent virtual users emit metric samples. The
//! engine keeps one aggregated sink per tracked metric, feeds the sinks from
//! an [`Output`] adapter (the [`Ingester`]), evaluates the configured
//! thresholds every couple of seconds from a background thread, and can
//! abort the test when an abort-on-fail threshold breaks. Snapshots of
//! everything observed are available at any time through
//! [`MetricsEngine::observed_metrics`].
//!
//! The usual wiring, from the test runner's point of view:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use stampede_engine::{MetricsEngine, Output, TestRunState};
//! use stampede_metrics::{MetricKind, Registry, ValueType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.must_new_metric("http_req_duration", MetricKind::Trend, ValueType::Time);
//!
//! let engine = Arc::new(MetricsEngine::new(TestRunState {
//!     registry,
//!     ..TestRunState::default()
//! })?);
//!
//! let mut ingester = engine.create_ingester();
//! ingester.start()?;
//!
//! let started = Instant::now();
//! let calculations = engine.start_threshold_calculations(
//!     |err| eprintln!("aborting the test: {err}"),
//!     move || started.elapsed(),
//! );
//!
//! // ... the test runs, producers call ingester.add_metric_samples(...) ...
//!
//! if let Some(calculations) = calculations {
//!     let breached = calculations.finalize();
//!     assert!(breached.is_empty());
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod errext;
mod ingester;
mod output;
mod state;

pub use engine::{
    EngineError, MetricsEngine, ObservedMetric, ThresholdCalculations, ThresholdMetricError,
};
pub use errext::{AbortError, AbortReason, ExitCode};
pub use ingester::Ingester;
pub use output::{Output, OutputError, PeriodicFlusher, SampleBuffer};
pub use state::{RuntimeOptions, SystemTag, SystemTagSet, TestRunState};
