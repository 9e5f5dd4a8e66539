//! Error Types
//!
//! Errors surfaced by the admission gate and its HTTP wrapper. Only
//! [`AdmissionError`] ever reaches a caller of the admission API; metadata
//! parse failures are logged and absorbed by the limiter.

/// Why an admission ticket resolved without permission to proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The ticket was cancelled before it reached the head of the queue
    #[error("Admission cancelled before it was granted")]
    Cancelled,

    /// The limiter was dropped while the ticket was still queued
    #[error("Limiter shut down before admission was granted")]
    Shutdown,
}

/// Malformed or missing quota metadata on a response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataParseError {
    /// A required header was absent
    #[error("Missing quota header: {0}")]
    Missing(String),

    /// A header was present but not a number
    #[error("Invalid value for {header}: {value:?}")]
    Invalid { header: String, value: String },

    /// A header parsed but falls outside the accepted range
    #[error("Value out of range for {header}: {value}")]
    OutOfRange { header: String, value: String },
}

/// Errors returned by [`crate::client::RateLimitedClient`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never got an admission slot
    #[error("Request not admitted: {0}")]
    Admission(#[from] AdmissionError),

    /// The underlying HTTP call failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// True when the request was abandoned before it was sent
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Admission(AdmissionError::Cancelled))
    }
}
