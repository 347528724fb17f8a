use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::{Metric, MetricKind, TagSet, ValueType};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\p{N}\._ !\?/&#\(\)<>%-]{1,128}$").expect("valid name pattern")
});

/// Errors that can occur while registering a metric.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The metric name did not match the allowed pattern.
    #[error("invalid metric name: '{0}'")]
    InvalidMetricName(String),

    /// The name is already registered with a different kind.
    #[error("metric '{name}' already exists but with kind {existing}, instead of {requested}")]
    KindConflict {
        /// The conflicting name.
        name: String,
        /// The kind it was first registered with.
        existing: MetricKind,
        /// The kind of the rejected registration.
        requested: MetricKind,
    },

    /// The name is already registered with a different value type.
    #[error(
        "metric '{name}' already exists but with a value type {existing}, instead of {requested}"
    )]
    ValueTypeConflict {
        /// The conflicting name.
        name: String,
        /// The value type it was first registered with.
        existing: ValueType,
        /// The value type of the rejected registration.
        requested: ValueType,
    },
}

/// The central listing of metrics for one test run.
///
/// All metrics, and the tag-set root everything branches out from, come from
/// here. `Registry` is a cheap-clone handle; reads take a shared lock and
/// never block other readers.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    metrics: RwLock<HashMap<String, Metric>>,
    root: TagSet,
}

impl Registry {
    /// Creates an empty registry with a fresh tag-set root.
    pub fn new() -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                metrics: RwLock::new(HashMap::new()),
                root: TagSet::new_root(),
            }),
        }
    }

    /// Registers a metric, or returns the existing one when name, kind, and
    /// value type all match a previous registration.
    pub fn new_metric(
        &self,
        name: &str,
        kind: MetricKind,
        contains: ValueType,
    ) -> Result<Metric, RegistryError> {
        if !NAME_PATTERN.is_match(name) {
            return Err(RegistryError::InvalidMetricName(name.to_string()));
        }

        let mut metrics = self.inner.metrics.write();
        match metrics.get(name) {
            Some(existing) => {
                if existing.kind() != kind {
                    return Err(RegistryError::KindConflict {
                        name: name.to_string(),
                        existing: existing.kind(),
                        requested: kind,
                    });
                }
                if existing.contains() != contains {
                    return Err(RegistryError::ValueTypeConflict {
                        name: name.to_string(),
                        existing: existing.contains(),
                        requested: contains,
                    });
                }
                Ok(existing.clone())
            }
            None => {
                let metric =
                    Metric::new(name.to_string(), kind, contains, self.inner.root.clone());
                metrics.insert(name.to_string(), metric.clone());
                Ok(metric)
            }
        }
    }

    /// Like [`new_metric`](Registry::new_metric), but panics on error.
    ///
    /// For tests and startup-time wiring only.
    pub fn must_new_metric(&self, name: &str, kind: MetricKind, contains: ValueType) -> Metric {
        match self.new_metric(name, kind, contains) {
            Ok(metric) => metric,
            Err(err) => panic!("{err}"),
        }
    }

    /// Looks up a metric by name. Submetrics are not stored here; derive them
    /// through their parent.
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.inner.metrics.read().get(name).cloned()
    }

    /// The empty root set that all tag sets of this registry must originate
    /// from.
    pub fn root_tag_set(&self) -> TagSet {
        self.inner.root.clone()
    }

    /// A snapshot of all registered metrics.
    pub fn all(&self) -> Vec<Metric> {
        self.inner.metrics.read().values().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
