use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use stampede_metrics::{Metric, Sample, SampleContainer, Samples};
use tracing::debug;

use crate::engine::MetricsEngine;
use crate::output::{Output, OutputError, PeriodicFlusher, SampleBuffer};

/// How often buffered samples are applied to the tracked metrics.
const COLLECT_RATE: Duration = Duration::from_millis(50);

const INGESTER_DESCRIPTION: &str = "engine";

/// The engine-side output: buffers incoming samples and periodically feeds
/// them into the engine's tracked metrics.
///
/// Created through [`MetricsEngine::create_ingester`]. Cloning returns
/// another handle to the same ingester.
#[derive(Clone)]
pub struct Ingester {
    inner: Arc<IngesterInner>,
}

pub(crate) struct IngesterInner {
    buffer: SampleBuffer,
    engine: Weak<MetricsEngine>,
    flusher: Mutex<Option<PeriodicFlusher>>,
}

impl Ingester {
    pub(crate) fn new(engine: &Arc<MetricsEngine>) -> Ingester {
        Ingester {
            inner: Arc::new(IngesterInner {
                buffer: SampleBuffer::default(),
                engine: Arc::downgrade(engine),
                flusher: Mutex::new(None),
            }),
        }
    }
}

impl Output for Ingester {
    fn description(&self) -> String {
        INGESTER_DESCRIPTION.to_string()
    }

    fn start(&mut self) -> Result<(), OutputError> {
        let mut slot = self.inner.flusher.lock();
        if slot.is_some() {
            return Err(OutputError("the ingester is already started".to_string()));
        }

        debug!("Starting the metrics engine ingester...");
        let inner = Arc::clone(&self.inner);
        *slot = Some(PeriodicFlusher::new(COLLECT_RATE, move || inner.flush_metrics()));
        debug!("The metrics engine ingester started!");
        Ok(())
    }

    fn add_metric_samples(&mut self, samples: Vec<Samples>) {
        self.inner.buffer.add_metric_samples(samples);
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        let flusher = self.inner.flusher.lock().take();
        if let Some(flusher) = flusher {
            debug!("Stopping the metrics engine ingester...");
            flusher.stop();
            debug!("The metrics engine ingester stopped!");
        }
        Ok(())
    }
}

impl IngesterInner {
    /// Applies everything buffered so far: each sample lands in its metric's
    /// sink, and in the sink of every derived submetric whose tag filter the
    /// sample matches.
    fn flush_metrics(&self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        let containers = self.buffer.get_buffered_samples();
        if containers.is_empty() {
            return;
        }

        // Group first so every tracked metric's lock is taken once per flush.
        let mut by_metric: HashMap<Metric, Vec<Sample>> = HashMap::new();
        for container in &containers {
            for sample in container.samples() {
                by_metric.entry(sample.metric.clone()).or_default().push(sample.clone());

                for submetric in sample.metric.submetrics() {
                    let filter = submetric
                        .sub()
                        .expect("submetric carries its descriptor")
                        .tags()
                        .clone();
                    if sample.tags.contains(&filter) {
                        by_metric.entry(submetric).or_default().push(sample.clone());
                    }
                }
            }
        }

        for (metric, samples) in by_metric {
            engine.tracked_for(&metric).add_samples(&samples);
        }
    }
}
