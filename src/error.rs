//! Error types.
//!
//! [`QuickPulseError`] covers caller mistakes (bad arguments, accumulator
//! lifecycle misuse) and is returned synchronously. [`TransportError`] covers
//! everything that can go wrong talking to the collection service; the
//! collector absorbs those into backoff and never hands them to the host.

use thiserror::Error;

/// Errors surfaced to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuickPulseError {
    /// A required input is missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was called at the wrong point of a lifecycle, e.g. an
    /// accumulator finished before it started.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl QuickPulseError {
    pub(crate) fn empty_name() -> Self {
        QuickPulseError::InvalidArgument("property name must not be empty".to_string())
    }
}

/// Result type for fallible crate operations.
pub type Result<T> = std::result::Result<T, QuickPulseError>;

/// Failure of a single ping or post round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The send did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection-level failure reported by the transport.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("service returned status {0}")]
    Status(u16),

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Malformed(err.to_string())
    }
}
