use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::selector::{self, SelectorError};
use crate::{MetricKind, TagSet, ValueType};

/// A named, typed identifier for a stream of samples.
///
/// `Metric` is a cheap-clone handle; equality and hashing go by identity, so
/// two handles compare equal only if they came from the same registration.
#[derive(Clone)]
pub struct Metric(Arc<MetricData>);

struct MetricData {
    name: String,
    kind: MetricKind,
    contains: ValueType,
    sub: Option<Submetric>,
    root: TagSet,
    submetrics: Mutex<HashMap<String, Weak<MetricData>>>,
}

/// The descriptor a derived metric carries: its parent and the tag filter
/// samples must match to count towards it.
#[derive(Clone)]
pub struct Submetric {
    parent: Metric,
    suffix: String,
    tags: TagSet,
}

impl Submetric {
    /// The metric this submetric was derived from.
    pub fn parent(&self) -> &Metric {
        &self.parent
    }

    /// The canonical filter expression, without the braces.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The filter as an interned tag set.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}

impl Metric {
    pub(crate) fn new(
        name: String,
        kind: MetricKind,
        contains: ValueType,
        root: TagSet,
    ) -> Metric {
        Metric(Arc::new(MetricData {
            name,
            kind,
            contains,
            sub: None,
            root,
            submetrics: Mutex::new(HashMap::new()),
        }))
    }

    /// The unique name of this metric. For submetrics this includes the
    /// canonical filter, e.g. `http_reqs{status:500}`.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The metric kind.
    pub fn kind(&self) -> MetricKind {
        self.0.kind
    }

    /// The type of values the metric contains.
    pub fn contains(&self) -> ValueType {
        self.0.contains
    }

    /// The submetric descriptor, when this metric was derived from a parent.
    pub fn sub(&self) -> Option<&Submetric> {
        self.0.sub.as_ref()
    }

    /// Derives the submetric matching the given tag filter, e.g.
    /// `status:500,method:GET`, creating it on first use.
    ///
    /// Filter expressions that canonicalize to the same pairs return the
    /// same handle. Submetrics cannot be derived from other submetrics.
    pub fn add_submetric(&self, filter_expr: &str) -> Result<Metric, SelectorError> {
        if self.0.sub.is_some() {
            return Err(SelectorError::NestedSubmetric);
        }

        let filter = selector::parse(filter_expr)?;
        let canonical = selector::canonical(&filter);

        let mut submetrics = self.0.submetrics.lock();
        if let Some(existing) = submetrics.get(&canonical).and_then(Weak::upgrade) {
            return Ok(Metric(existing));
        }

        let mut tags = self.0.root.clone();
        for (key, value) in &filter {
            tags = tags.with(key, value);
        }

        let child = Metric(Arc::new(MetricData {
            name: format!("{}{{{canonical}}}", self.0.name),
            kind: self.0.kind,
            contains: self.0.contains,
            sub: Some(Submetric { parent: self.clone(), suffix: canonical.clone(), tags }),
            root: self.0.root.clone(),
            submetrics: Mutex::new(HashMap::new()),
        }));
        submetrics.insert(canonical, Arc::downgrade(&child.0));
        Ok(child)
    }

    /// A snapshot of the currently live submetrics derived from this metric.
    pub fn submetrics(&self) -> Vec<Metric> {
        self.0.submetrics.lock().values().filter_map(Weak::upgrade).map(Metric).collect()
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.0) as usize);
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("contains", &self.0.contains)
            .finish_non_exhaustive()
    }
}
