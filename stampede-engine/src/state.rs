use std::collections::HashMap;
use std::ops::BitOr;

use stampede_metrics::{Registry, Thresholds};

/// The tags the test runner itself attaches to samples.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SystemTag {
    /// The protocol of the request, e.g. `HTTP/1.1`.
    Proto,
    /// The subprotocol negotiated on a websocket connection.
    Subproto,
    /// The response status code.
    Status,
    /// The request method.
    Method,
    /// The request URL.
    Url,
    /// The user-assigned request name.
    Name,
    /// The group the sample was emitted from.
    Group,
    /// The name of the check a rate sample belongs to.
    Check,
    /// The error message, when the request failed.
    Error,
    /// The error code, when the request failed.
    ErrorCode,
    /// The negotiated TLS version.
    TlsVersion,
    /// The scenario the virtual user was executing.
    Scenario,
    /// The gRPC service name.
    Service,
    /// Whether the response status was among the expected ones.
    ExpectedResponse,
}

impl SystemTag {
    fn mask(self) -> u32 {
        1 << (self as u32)
    }
}

/// A set of [`SystemTag`]s, packed into a bitmask.
///
/// ```rust
/// # use stampede_engine::{SystemTag, SystemTagSet};
/// let tags = SystemTagSet::NONE | SystemTag::Status | SystemTag::Method;
/// assert!(tags.has(SystemTag::Status));
/// assert!(!tags.has(SystemTag::Url));
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SystemTagSet(u32);

impl SystemTagSet {
    /// The empty set.
    pub const NONE: SystemTagSet = SystemTagSet(0);

    /// Whether the set includes the given tag.
    pub fn has(&self, tag: SystemTag) -> bool {
        self.0 & tag.mask() != 0
    }
}

impl Default for SystemTagSet {
    /// The tags a test run collects unless configured otherwise: everything
    /// except the high-cardinality error details.
    fn default() -> Self {
        SystemTagSet::NONE
            | SystemTag::Proto
            | SystemTag::Subproto
            | SystemTag::Status
            | SystemTag::Method
            | SystemTag::Url
            | SystemTag::Name
            | SystemTag::Group
            | SystemTag::Check
            | SystemTag::TlsVersion
            | SystemTag::Scenario
            | SystemTag::Service
            | SystemTag::ExpectedResponse
    }
}

impl BitOr<SystemTag> for SystemTagSet {
    type Output = SystemTagSet;

    fn bitor(self, tag: SystemTag) -> SystemTagSet {
        SystemTagSet(self.0 | tag.mask())
    }
}

impl BitOr for SystemTagSet {
    type Output = SystemTagSet;

    fn bitor(self, other: SystemTagSet) -> SystemTagSet {
        SystemTagSet(self.0 | other.0)
    }
}

/// Runtime flags that change what the engine sets up at construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeOptions {
    /// Skip the end-of-test summary.
    pub no_summary: bool,
    /// Ignore invalid threshold definitions and never start the threshold
    /// ticker.
    pub no_thresholds: bool,
}

/// Everything about the test run the metrics engine consumes: the registry,
/// the configured thresholds by metric (or submetric) name, runtime flags,
/// and the enabled system tags.
#[derive(Clone, Default)]
pub struct TestRunState {
    /// The metric registry of the run.
    pub registry: Registry,
    /// Configured thresholds, keyed by `metric` or `metric{filter}` name.
    pub thresholds: HashMap<String, Thresholds>,
    /// Runtime flags.
    pub runtime_options: RuntimeOptions,
    /// The enabled system tags.
    pub system_tags: SystemTagSet,
}

#[cfg(test)]
mod tests {
    use super::{SystemTag, SystemTagSet};

    #[test]
    fn test_tag_set_matching() {
        let none = SystemTagSet::NONE;
        assert!(!none.has(SystemTag::Status));
        assert!(!none.has(SystemTag::ExpectedResponse));

        let some = SystemTagSet::NONE | SystemTag::Status | SystemTag::Check;
        assert!(some.has(SystemTag::Status));
        assert!(some.has(SystemTag::Check));
        assert!(!some.has(SystemTag::Url));

        let merged = some | (SystemTagSet::NONE | SystemTag::Url);
        assert!(merged.has(SystemTag::Url));
        assert!(merged.has(SystemTag::Status));
    }

    #[test]
    fn test_default_set() {
        let default = SystemTagSet::default();
        assert!(default.has(SystemTag::Status));
        assert!(default.has(SystemTag::ExpectedResponse));
        assert!(!default.has(SystemTag::ErrorCode));
    }
}
