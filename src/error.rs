//! Custom error types for the streaming writer.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Each failure the writer can report is a distinct variant so that callers can
//! branch on the condition rather than on message text:
//!
//! - **`NotPrimed`**: the sink has not yet seen a first frame, so its array
//!   dimensions are still zero. Raised by `open` before any configuration write.
//! - **`PathNotFound`**: the destination directory written to the sink does not
//!   exist on the sink's side.
//! - **`DtypeUnsupported`**: the sink reported an element-type tag that is not
//!   in the resolver table.
//! - **`Timeout`**: any bounded wait on a hardware-reported value expired
//!   (capture settle, counter poll, flush acknowledgment, pending completion).
//! - **`SinkConfigurationFailure`**: one of the joint configuration writes in
//!   `open` failed; the whole batch is abandoned.
//!
//! Lower level collaborator failures (`Signal`, `Disconnected`) and misuse of
//! the session (`NotOpen`) round out the taxonomy. None of these are retried
//! internally.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the writer reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaqError {
    /// Sink has not produced a first frame
    #[error("File sink has not been primed: primary array dimension is 0")]
    NotPrimed,

    /// Destination directory is missing on the sink side
    #[error("File path {0} for the file sink does not exist")]
    PathNotFound(String),

    /// Element type tag outside the resolver table
    #[error("Unsupported element type tag '{0}'")]
    DtypeUnsupported(String),

    /// A bounded wait expired
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// Condition that was awaited
        what: String,
        /// Bound that expired
        after: Duration,
    },

    /// A write in the joint configuration batch failed
    #[error("Sink configuration failed: {0}")]
    SinkConfigurationFailure(String),

    /// A control point read or write failed
    #[error("Signal '{source_name}' failed: {reason}")]
    Signal {
        /// Address of the control point
        source_name: String,
        /// Failure reported by the backend
        reason: String,
    },

    /// A monitored control point went away
    #[error("Signal '{0}' disconnected")]
    Disconnected(String),

    /// No session to act on
    #[error("No capture session is open")]
    NotOpen,

    /// Caller passed an unusable value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DaqError {
    pub(crate) fn timeout(what: impl Into<String>, after: Duration) -> Self {
        DaqError::Timeout {
            what: what.into(),
            after,
        }
    }

    pub(crate) fn signal(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        DaqError::Signal {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// True for any bounded-wait expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DaqError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::PathNotFound("/data/2024".to_string());
        assert_eq!(
            err.to_string(),
            "File path /data/2024 for the file sink does not exist"
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = DaqError::timeout("capture == false", Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("capture == false"));
        assert!(!DaqError::NotPrimed.is_timeout());
    }
}
