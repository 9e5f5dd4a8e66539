//! QuotaGate Library
//!
//! Client-side admission control for HTTP APIs that advertise a rolling
//! request quota through response headers. Requests queue for admission and
//! are released in order as soon as the remote quota allows.

pub mod client;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod metrics_server;

pub use client::RateLimitedClient;
pub use error::{AdmissionError, ClientError, MetadataParseError};
pub use limiter::{Admission, CancelToken, Limiter, LimiterConfig, QuotaMetadata, QuotaSnapshot};
