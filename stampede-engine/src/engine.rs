use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::{Mutex, RwLock};
use stampede_metrics::selector::{self, SelectorError};
use stampede_metrics::{
    Metric, Registry, Sample, Sink, Threshold, ThresholdParseError, Thresholds,
};
use tracing::{debug, error, warn};

use crate::errext::AbortError;
use crate::ingester::Ingester;
use crate::output::Output;
use crate::state::{SystemTag, TestRunState};

/// How often the configured thresholds are evaluated while the test runs.
const THRESHOLDS_RATE: Duration = Duration::from_secs(2);

/// The submetric that gets pre-tracked when the `expected_response` system
/// tag is enabled, so the end-of-test summary can tell expected responses
/// apart even before thresholds reference them.
const EXPECTED_RESPONSE_SELECTOR: &str = "http_req_duration{expected_response:true}";

/// Why a metric referenced by the threshold configuration could not be
/// resolved.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdMetricError {
    /// The base metric was never registered.
    #[error("metric '{0}' does not exist in the script")]
    UnknownMetric(String),

    /// The submetric selector did not parse.
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// A threshold expression does not fit the metric's kind.
    #[error(transparent)]
    Expression(#[from] ThresholdParseError),
}

/// Errors from constructing the metrics engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A threshold definition referenced a metric that could not be resolved.
    #[error("invalid metric '{name}' in threshold definitions")]
    InvalidThresholdMetric {
        /// The metric (or submetric) name as configured.
        name: String,
        /// What went wrong resolving it.
        #[source]
        source: ThresholdMetricError,
    },
}

/// A consistent copy of one observed metric, for the end-of-test summary and
/// the live read API.
///
/// The sink is a by-value copy taken under the metric's lock; reading it
/// needs no further synchronization.
#[derive(Clone, Debug)]
pub struct ObservedMetric {
    /// The metric this entry describes.
    pub metric: Metric,
    /// A copy of the metric's aggregate at snapshot time.
    pub sink: Sink,
    /// Whether the metric's thresholds were failing when last evaluated.
    pub tainted: bool,
    /// A copy of the thresholds configured for the metric.
    pub thresholds: Vec<Threshold>,
}

/// The engine's per-metric record: the sink and its flags, all guarded by
/// one lock so producers, the evaluator, and snapshot readers each see a
/// consistent state.
pub(crate) struct TrackedMetric {
    metric: Metric,
    state: Mutex<TrackedState>,
}

struct TrackedState {
    sink: Sink,
    observed: bool,
    tainted: bool,
}

impl TrackedMetric {
    fn new(metric: Metric) -> TrackedMetric {
        let sink = Sink::new(metric.kind());
        TrackedMetric { metric, state: Mutex::new(TrackedState { sink, observed: false, tainted: false }) }
    }

    /// Like [`new`](TrackedMetric::new), but already marked observed, so the
    /// metric shows up in the summary even without samples.
    fn new_observed(metric: Metric) -> TrackedMetric {
        let tracked = TrackedMetric::new(metric);
        tracked.state.lock().observed = true;
        tracked
    }

    pub(crate) fn add_samples(&self, samples: &[Sample]) {
        let mut state = self.state.lock();
        for sample in samples {
            state.sink.add(sample);
        }
        if !state.observed {
            state.observed = true;
        }
    }
}

/// The metrics engine: keeps one aggregated sink per tracked metric, feeds
/// them from the [`Ingester`], periodically evaluates the configured
/// thresholds, and can abort the test when an abort-on-fail threshold
/// breaks.
pub struct MetricsEngine {
    test: TestRunState,
    metrics_with_thresholds: HashMap<Metric, Mutex<Thresholds>>,
    tracked_metrics: RwLock<HashMap<Metric, Arc<TrackedMetric>>>,
    breached_thresholds_count: AtomicU32,
    ingester: Mutex<Option<Ingester>>,
}

impl std::fmt::Debug for MetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEngine").finish_non_exhaustive()
    }
}

impl MetricsEngine {
    /// Builds the engine for the given test run: seeds a tracked entry for
    /// every registered metric, resolves the (sub)metrics named by the
    /// threshold configuration, and validates every threshold against its
    /// metric's kind.
    pub fn new(test: TestRunState) -> Result<MetricsEngine, EngineError> {
        let mut metrics_with_thresholds = HashMap::new();
        let mut tracked = HashMap::new();

        for metric in test.registry.all() {
            tracked.insert(metric.clone(), Arc::new(TrackedMetric::new(metric)));
        }

        let skip_thresholds =
            test.runtime_options.no_summary && test.runtime_options.no_thresholds;
        if !skip_thresholds {
            for (name, thresholds) in &test.thresholds {
                let metric = match resolve_threshold_metric(&test.registry, name, thresholds) {
                    Ok(metric) => metric,
                    Err(err) if test.runtime_options.no_thresholds => {
                        warn!(
                            metric_name = %name,
                            error = %err,
                            "Invalid metric in threshold definitions"
                        );
                        continue;
                    }
                    Err(err) => {
                        return Err(EngineError::InvalidThresholdMetric {
                            name: name.clone(),
                            source: err,
                        })
                    }
                };

                // With thresholds disabled the metrics are still resolved and
                // tracked for the summary, but nothing is recorded for the
                // evaluator, so the ticker never starts.
                if !thresholds.is_empty() && !test.runtime_options.no_thresholds {
                    metrics_with_thresholds
                        .insert(metric.clone(), Mutex::new(thresholds.clone()));
                }

                // Mark the metric, and the parent if it is a submetric, as
                // observed so they show up in the end-of-test summary even
                // without samples.
                tracked.insert(
                    metric.clone(),
                    Arc::new(TrackedMetric::new_observed(metric.clone())),
                );
                if let Some(sub) = metric.sub() {
                    let parent = sub.parent().clone();
                    tracked
                        .insert(parent.clone(), Arc::new(TrackedMetric::new_observed(parent)));
                }
            }

            if test.system_tags.has(SystemTag::ExpectedResponse) {
                let metric = resolve_threshold_metric(
                    &test.registry,
                    EXPECTED_RESPONSE_SELECTOR,
                    &Thresholds::default(),
                )
                .map_err(|err| EngineError::InvalidThresholdMetric {
                    name: EXPECTED_RESPONSE_SELECTOR.to_string(),
                    source: err,
                })?;
                tracked
                    .entry(metric.clone())
                    .or_insert_with(|| Arc::new(TrackedMetric::new(metric)));
            }
        }

        Ok(MetricsEngine {
            test,
            metrics_with_thresholds,
            tracked_metrics: RwLock::new(tracked),
            breached_thresholds_count: AtomicU32::new(0),
            ingester: Mutex::new(None),
        })
    }

    /// The test run state the engine was built from.
    pub fn test_run_state(&self) -> &TestRunState {
        &self.test
    }

    /// Returns an [`Output`] that feeds received samples into this engine.
    pub fn create_ingester(self: &Arc<Self>) -> Ingester {
        let ingester = Ingester::new(self);
        *self.ingester.lock() = Some(ingester.clone());
        ingester
    }

    /// The tracked entry for a metric, created on demand for metrics first
    /// seen through samples.
    pub(crate) fn tracked_for(&self, metric: &Metric) -> Arc<TrackedMetric> {
        if let Some(tracked) = self.tracked_metrics.read().get(metric) {
            return Arc::clone(tracked);
        }

        let mut tracked_metrics = self.tracked_metrics.write();
        Arc::clone(
            tracked_metrics
                .entry(metric.clone())
                .or_insert_with(|| Arc::new(TrackedMetric::new(metric.clone()))),
        )
    }

    /// Spawns the background task that evaluates thresholds every two
    /// seconds and calls `abort` when an abort-on-fail threshold breaks.
    /// Returns `None` when no thresholds are configured.
    ///
    /// The elapsed test duration is supplied by `now`; the engine never
    /// measures time itself.
    pub fn start_threshold_calculations(
        self: &Arc<Self>,
        abort: impl Fn(AbortError) + Send + 'static,
        now: impl Fn() -> Duration + Send + Sync + 'static,
    ) -> Option<ThresholdCalculations> {
        if self.metrics_with_thresholds.is_empty() {
            // No thresholds were defined.
            return None;
        }

        let now: Arc<dyn Fn() -> Duration + Send + Sync> = Arc::new(now);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let engine = Arc::clone(self);
        let thread_now = Arc::clone(&now);
        let handle = thread::spawn(move || {
            let ticker = tick(THRESHOLDS_RATE);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let (breached, should_abort) =
                            engine.evaluate_thresholds(true, thread_now.as_ref());
                        if should_abort {
                            let err = AbortError::thresholds_breached(&breached);
                            debug!("{err}");
                            abort(err);
                        }
                    }
                    recv(stop_rx) -> _ => return,
                }
            }
        });

        Some(ThresholdCalculations {
            engine: Arc::clone(self),
            stop: Some(stop_tx),
            handle,
            now,
        })
    }

    /// Evaluates the thresholds of every metric that has them. Returns the
    /// sorted names of the breached metrics and whether any breach asks for
    /// a test abort.
    fn evaluate_thresholds(
        &self,
        ignore_empty_sinks: bool,
        now: &dyn Fn() -> Duration,
    ) -> (Vec<String>, bool) {
        let elapsed = now();
        let mut breached = Vec::new();
        let mut should_abort = false;

        debug!(
            metric_count = self.metrics_with_thresholds.len(),
            "Running thresholds..."
        );
        for (metric, thresholds) in &self.metrics_with_thresholds {
            let tracked = self
                .tracked_metrics
                .read()
                .get(metric)
                .cloned()
                .unwrap_or_else(|| {
                    panic!("metric '{}' with thresholds is not tracked", metric.name())
                });

            let mut state = tracked.state.lock();
            let mut thresholds = thresholds.lock();
            if thresholds.is_empty() || (ignore_empty_sinks && state.sink.is_empty()) {
                continue;
            }
            state.tainted = false;

            match thresholds.run(&mut state.sink, elapsed) {
                Err(err) => {
                    error!(metric_name = %metric.name(), error = %err, "Threshold error");
                    continue;
                }
                Ok(true) => {}
                Ok(false) => {
                    breached.push(metric.name().to_string());
                    state.tainted = true;
                    if thresholds.abort() {
                        should_abort = true;
                    }
                }
            }
        }

        breached.sort();
        breached.dedup();
        if !breached.is_empty() {
            debug!(breached = ?breached, "Thresholds breached");
        }
        self.breached_thresholds_count.store(breached.len() as u32, Ordering::SeqCst);
        (breached, should_abort)
    }

    /// A snapshot of every observed metric, keyed by name.
    pub fn observed_metrics(&self) -> HashMap<String, ObservedMetric> {
        let tracked_metrics = self.tracked_metrics.read();
        let mut observed = HashMap::with_capacity(tracked_metrics.len());
        for tracked in tracked_metrics.values() {
            if let Some(metric) = self.tracked_to_observed(tracked) {
                observed.insert(metric.metric.name().to_string(), metric);
            }
        }
        observed
    }

    /// A snapshot of a single observed metric, by name.
    pub fn observed_metric_by_id(&self, id: &str) -> Option<ObservedMetric> {
        let tracked_metrics = self.tracked_metrics.read();
        let tracked = tracked_metrics.values().find(|tm| tm.metric.name() == id)?;
        self.tracked_to_observed(tracked)
    }

    /// Copies a tracked entry into a self-contained observed metric, or
    /// `None` if the metric was never observed.
    fn tracked_to_observed(&self, tracked: &TrackedMetric) -> Option<ObservedMetric> {
        let (sink, tainted) = {
            let state = tracked.state.lock();
            if !state.observed {
                return None;
            }
            (state.sink.clone(), state.tainted)
        };

        let thresholds = self
            .metrics_with_thresholds
            .get(&tracked.metric)
            .map(|thresholds| thresholds.lock().thresholds().to_vec())
            .unwrap_or_default();

        Some(ObservedMetric { metric: tracked.metric.clone(), sink, tainted, thresholds })
    }

    /// How many metrics had breached thresholds in the last evaluation pass.
    /// Safe to call from any thread.
    pub fn metrics_with_breached_thresholds_count(&self) -> u32 {
        self.breached_thresholds_count.load(Ordering::SeqCst)
    }
}

/// Resolves the metric or submetric a threshold configuration entry names,
/// and checks the thresholds fit its kind.
fn resolve_threshold_metric(
    registry: &Registry,
    name: &str,
    thresholds: &Thresholds,
) -> Result<Metric, ThresholdMetricError> {
    let (base, filter) = selector::split_name(name)?;
    let metric = registry
        .get(base)
        .ok_or_else(|| ThresholdMetricError::UnknownMetric(base.to_string()))?;

    let resolved = match filter {
        None => metric,
        Some(expr) => {
            let submetric = metric.add_submetric(expr)?;
            let descriptor = submetric.sub().expect("submetric carries its descriptor");
            for key in ["vu", "iter"] {
                if descriptor.tags().get(key).is_some() {
                    warn!(
                        threshold = %name,
                        tag = key,
                        "The high-cardinality tag is not indexable, so thresholds based on \
                         it won't work correctly"
                    );
                }
            }
            submetric
        }
    };

    thresholds.validate(resolved.kind())?;
    Ok(resolved)
}

/// Handle for the running threshold evaluation task, returned by
/// [`MetricsEngine::start_threshold_calculations`].
pub struct ThresholdCalculations {
    engine: Arc<MetricsEngine>,
    stop: Option<Sender<()>>,
    handle: JoinHandle<()>,
    now: Arc<dyn Fn() -> Duration + Send + Sync>,
}

impl ThresholdCalculations {
    /// Stops the ingester and the evaluation task, runs one final evaluation
    /// that no longer skips empty sinks, and returns the sorted names of the
    /// breached metrics.
    pub fn finalize(mut self) -> Vec<String> {
        let ingester = self.engine.ingester.lock().take();
        if let Some(mut ingester) = ingester {
            // Stop the ingester so we don't get any more metrics.
            if let Err(err) = ingester.stop() {
                warn!(error = %err, "There was a problem stopping the output ingester.");
            }
        }

        drop(self.stop.take());
        self.handle.join().expect("threshold calculation thread panicked");

        let (breached, _) = self.engine.evaluate_thresholds(false, self.now.as_ref());
        breached
    }
}
