//! Error metadata the test runner acts on: process exit codes and machine
//! readable abort reasons, attached to the errors the engine hands to the
//! abort callback.

/// The process exit code an error maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitCode {
    /// At least one threshold failed by the end of the test.
    ThresholdsHaveFailed,
}

impl ExitCode {
    /// The numeric process exit code.
    pub fn code(&self) -> i32 {
        match self {
            ExitCode::ThresholdsHaveFailed => 99,
        }
    }
}

/// Why a test run was aborted before its configured end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// A failing threshold with abort-on-fail enabled stopped the run.
    AbortedByThreshold,
}

/// The error delivered through the abort callback when the engine stops a
/// test prematurely.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AbortError {
    message: String,
    exit_code: ExitCode,
    reason: AbortReason,
}

impl AbortError {
    pub(crate) fn thresholds_breached(breached: &[String]) -> AbortError {
        AbortError {
            message: format!(
                "thresholds on metrics '{}' were breached; at least one has abort_on_fail \
                 enabled, stopping test prematurely",
                breached.join(", ")
            ),
            exit_code: ExitCode::ThresholdsHaveFailed,
            reason: AbortReason::AbortedByThreshold,
        }
    }

    /// The exit code the test process should finish with.
    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    /// The machine-readable abort reason.
    pub fn reason(&self) -> AbortReason {
        self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::{AbortError, AbortReason, ExitCode};

    #[test]
    fn test_thresholds_breached_error() {
        let err =
            AbortError::thresholds_breached(&["checks".to_string(), "http_reqs".to_string()]);
        assert_eq!(err.exit_code(), ExitCode::ThresholdsHaveFailed);
        assert_eq!(err.exit_code().code(), 99);
        assert_eq!(err.reason(), AbortReason::AbortedByThreshold);
        assert!(err.to_string().contains("'checks, http_reqs'"));
    }
}
