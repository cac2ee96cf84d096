//! Failure taxonomy for workflow operations.
//!
//! Every workflow operation resolves to either a success payload or a
//! [`FlowError`] carrying a stable wire code. Local recovery is preferred:
//! a single failed fallback branch is absorbed by its caller, and only the
//! exhaustion of all fallbacks within a bounded wait becomes an error.

use thiserror::Error;

/// A typed workflow failure. The wire shape is `{ code, message }`.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The inbound action kind is not part of the supported set.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// A required field or control never became visible within its timeout.
    #[error("{0}")]
    ElementNotFound(String),

    /// A CAPTCHA or one-time-passcode challenge blocks the automation.
    #[error("authentication blocked: {0}")]
    AuthenticationBlocked(String),

    /// A step needs a human. Surfaced like an error on this path, although
    /// most manual states travel as non-error payloads instead.
    #[error("manual step required: {0}")]
    ManualStepRequired(String),

    /// No download URL could be discovered from any candidate source.
    #[error("no download URL resolved: {0}")]
    ArtifactUnresolved(String),

    /// A same-context refetch of a resolved URL returned a non-success status.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Adapter, serialization, or precondition errors. The structured
    /// catch-all: callers always receive a shaped failure, never an
    /// unhandled escape.
    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

impl FlowError {
    /// Stable error code for the outbound `{ code, message }` shape.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedAction(_) => "UNSUPPORTED_ACTION",
            Self::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            Self::AuthenticationBlocked(_) => "AUTHENTICATION_BLOCKED",
            Self::ManualStepRequired(_) => "MANUAL_STEP_REQUIRED",
            Self::ArtifactUnresolved(_) => "ARTIFACT_UNRESOLVED",
            Self::NetworkFailure(_) => "NETWORK_FAILURE",
            Self::Driver(_) => "ACTION_FAILED",
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            FlowError::UnsupportedAction("X".into()).code(),
            "UNSUPPORTED_ACTION"
        );
        assert_eq!(
            FlowError::ElementNotFound("missing".into()).code(),
            "ELEMENT_NOT_FOUND"
        );
        assert_eq!(
            FlowError::NetworkFailure("503".into()).code(),
            "NETWORK_FAILURE"
        );
        assert_eq!(
            FlowError::Driver(anyhow::anyhow!("boom")).code(),
            "ACTION_FAILED"
        );
    }

    #[test]
    fn test_driver_message_passthrough() {
        let err = FlowError::Driver(anyhow::anyhow!("page handle unavailable"));
        assert_eq!(err.to_string(), "page handle unavailable");
    }
}
