//! Admission Control Module
//!
//! Gates outgoing requests against a quota the remote service advertises in
//! its response headers (limit, remaining, reset). Callers queue for
//! admission before sending; responses feed the reported window back in.
//!
//! # Features
//!
//! - Strict FIFO admission, cancelled tickets skipped without charge
//! - Single wake timer per limiter, re-armed only when none is pending
//! - Monotonic window reconciliation: late responses never roll the state back
//! - Conservative refill: `max(1, floor((limit - 1) / 4) * 2)` per window
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Limiter                            │
//! │   request_admission()                on_response_headers()   │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │          Scheduler           │        QuotaReconciler        │
//! │  ┌───────────┐ ┌──────────┐  │   limit + reset, monotonic    │
//! │  │ WaitQueue │ │  Timer   │  │                               │
//! │  └───────────┘ └──────────┘  │                               │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │                          QuotaState                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod config;
pub mod queue;
pub mod quota;
pub mod reconcile;
pub mod scheduler;

pub use admission::{Admission, Limiter};
pub use config::{HeaderNames, LimiterConfig};
pub use queue::{CancelToken, WaitQueue, WaitQueueEntry};
pub use quota::QuotaState;
pub use reconcile::{MergeOutcome, QuotaMetadata, QuotaReconciler};
pub use scheduler::QuotaSnapshot;

// Property-based tests module
#[cfg(test)]
mod proptests;
