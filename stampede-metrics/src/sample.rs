use std::time::SystemTime;

use crate::{Metric, TagSet};

/// A single observation of a metric at a point in time.
#[derive(Clone, Debug)]
pub struct Sample {
    /// The metric this sample belongs to.
    pub metric: Metric,
    /// When the observation was made.
    pub time: SystemTime,
    /// The observed value.
    pub value: f64,
    /// The tags attached to the observation.
    pub tags: TagSet,
}

/// Anything that can hand out a batch of samples.
///
/// Producers that already group samples (an HTTP request emits duration,
/// sent/received bytes, and a status in one go) implement this so outputs can
/// consume whole batches without flattening them first.
pub trait SampleContainer {
    /// The samples in this container.
    fn samples(&self) -> &[Sample];
}

/// The simplest sample container: a plain batch.
#[derive(Clone, Debug, Default)]
pub struct Samples(pub Vec<Sample>);

impl SampleContainer for Samples {
    fn samples(&self) -> &[Sample] {
        &self.0
    }
}

impl From<Vec<Sample>> for Samples {
    fn from(samples: Vec<Sample>) -> Self {
        Samples(samples)
    }
}

impl From<Sample> for Samples {
    fn from(sample: Sample) -> Self {
        Samples(vec![sample])
    }
}
