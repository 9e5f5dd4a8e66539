//! Admission API
//!
//! [`Limiter`] is the handle callers hold: ask for admission before sending a
//! request, and feed the response headers back once it completes.

use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

use super::config::{HeaderNames, LimiterConfig};
use super::queue::CancelToken;
use super::reconcile::{MergeOutcome, QuotaMetadata};
use super::scheduler::{QuotaSnapshot, Scheduler};
use crate::error::AdmissionError;
use crate::metrics;

/// Client-side admission gate for one API connection
///
/// Clones share the same queue and quota.
///
/// # Example
///
/// ```ignore
/// let limiter = Limiter::new(LimiterConfig::default());
///
/// limiter.request_admission().await?;
/// let response = client.get(url).send().await?;
/// limiter.on_response_headers(response.headers());
/// ```
#[derive(Debug, Clone)]
pub struct Limiter {
    scheduler: Arc<Scheduler>,
    headers: Arc<HeaderNames>,
}

impl Limiter {
    /// Create a limiter
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; the wake timer runs as a
    /// task on the runtime the limiter was created in.
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            scheduler: Scheduler::new(&config),
            headers: Arc::new(config.headers),
        }
    }

    /// Queue for admission
    ///
    /// The returned future resolves once the request may be sent. Dropping it
    /// abandons the ticket.
    pub fn request_admission(&self) -> Admission {
        self.request_admission_with(CancelToken::new())
    }

    /// Queue for admission with a caller-supplied cancellation signal
    pub fn request_admission_with(&self, cancel: CancelToken) -> Admission {
        let (tx, rx) = oneshot::channel();
        let id = self.scheduler.enqueue(cancel.clone(), tx);
        Admission { id, rx, cancel }
    }

    /// Merge quota metadata observed on any completed response
    pub fn on_response_metadata(&self, metadata: QuotaMetadata) -> MergeOutcome {
        self.scheduler.reconcile(&metadata)
    }

    /// Parse and merge the quota headers of a completed response
    ///
    /// Malformed or missing headers are logged and ignored; the current quota
    /// is kept. Returns `None` in that case.
    pub fn on_response_headers(&self, headers: &HeaderMap) -> Option<MergeOutcome> {
        match QuotaMetadata::from_headers(headers, &self.headers) {
            Ok(metadata) => Some(self.on_response_metadata(metadata)),
            Err(e) => {
                warn!("Ignoring quota headers: {}", e);
                metrics::METADATA_UPDATES_TOTAL
                    .with_label_values(&["invalid"])
                    .inc();
                None
            }
        }
    }

    /// Current quota, queue length and timer state
    pub fn snapshot(&self) -> QuotaSnapshot {
        self.scheduler.snapshot()
    }

    /// Disarm the pending wake timer
    ///
    /// Queued tickets then wait until the next enqueue or response re-arms it.
    pub fn stop_timer(&self) {
        self.scheduler.stop_timer();
    }

    /// Header names this limiter reads quota metadata from
    pub fn header_names(&self) -> &HeaderNames {
        &self.headers
    }
}

/// A queued admission ticket
///
/// Resolves to `Ok(())` when the caller may proceed, or to an error if the
/// ticket was cancelled or the limiter went away first.
#[derive(Debug)]
#[must_use = "admission tickets do nothing unless awaited"]
pub struct Admission {
    id: u64,
    rx: oneshot::Receiver<Result<(), AdmissionError>>,
    cancel: CancelToken,
}

impl Admission {
    /// Ticket identifier, increasing in enqueue order
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token that abandons this ticket when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Abandon this ticket
    ///
    /// Observed when the ticket reaches the head of the queue, at which
    /// point this future resolves to [`AdmissionError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for Admission {
    type Output = Result<(), AdmissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(AdmissionError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use reqwest::header::HeaderValue;
    use std::time::Duration;

    fn epoch_secs_from_now(offset_secs: f64) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0 + offset_secs
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_resolves_immediately_with_capacity() {
        let limiter = Limiter::new(LimiterConfig::default());
        assert_eq!(limiter.request_admission().await, Ok(()));
        assert_eq!(limiter.snapshot().remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_ids_increase() {
        let limiter = Limiter::new(LimiterConfig::default());
        let a = limiter.request_admission();
        let b = limiter.request_admission();
        assert!(a.id() < b.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_via_admission_handle() {
        let limiter = Limiter::new(LimiterConfig::default());
        let _a = limiter.request_admission();
        let _b = limiter.request_admission();

        let c = limiter.request_admission();
        c.cancel();
        assert_eq!(c.await, Err(AdmissionError::Cancelled));
        assert_eq!(limiter.snapshot().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_admission_is_skipped() {
        let limiter = Limiter::new(LimiterConfig::default());
        let _a = limiter.request_admission();
        let _b = limiter.request_admission();

        drop(limiter.request_admission());
        let d = limiter.request_admission();

        assert_eq!(d.await, Ok(()));
        assert_eq!(limiter.snapshot().remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_limiter_resolves_pending_tickets() {
        let limiter = Limiter::new(LimiterConfig::default());
        let _a = limiter.request_admission();
        let _b = limiter.request_admission();
        let c = limiter.request_admission();

        drop(limiter);
        assert_eq!(c.await, Err(AdmissionError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_quota() {
        let limiter = Limiter::new(LimiterConfig::default());
        let other = limiter.clone();

        limiter.request_admission().await.unwrap();
        other.request_admission().await.unwrap();

        let mut third = limiter.request_admission();
        assert!((&mut third).now_or_never().is_none());
        assert_eq!(other.snapshot().queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_response_headers() {
        let limiter = Limiter::new(LimiterConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4"));
        let reset = format!("{:.3}", epoch_secs_from_now(10.0));
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());

        assert_eq!(
            limiter.on_response_headers(&headers),
            Some(MergeOutcome::Accepted)
        );

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.limit, 5);
        // Remaining is never taken from the headers
        assert_eq!(snapshot.remaining, 2);
        assert!(snapshot.resets_in_ms > 10_500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_headers_keep_state() {
        let limiter = Limiter::new(LimiterConfig::default());
        let before = limiter.snapshot();

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("abc"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("soon"));

        assert_eq!(limiter.on_response_headers(&headers), None);
        assert_eq!(limiter.on_response_headers(&HeaderMap::new()), None);
        assert_eq!(limiter.snapshot(), before);

        // The gate still works afterwards
        assert_eq!(limiter.request_admission().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_feeds_wake_timer() {
        let limiter = Limiter::new(LimiterConfig::default());
        limiter.request_admission().await.unwrap();
        limiter.request_admission().await.unwrap();

        // Timer for the first window is already pending at +100ms; a later
        // window does not move it, the refill still happens there
        limiter.on_response_metadata(QuotaMetadata::new(9, None, epoch_secs_from_now(5.0)));

        let waiting = limiter.request_admission();
        let started = tokio::time::Instant::now();
        assert_eq!(waiting.await, Ok(()));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
