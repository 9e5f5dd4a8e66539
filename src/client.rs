//! Rate-Limited HTTP Client
//!
//! Wraps a `reqwest::Client` with the admission gate: every request waits
//! for admission before it is sent, and every response's quota headers are
//! fed back to the limiter.
//!
//! # Example
//!
//! ```ignore
//! use quotagate::client::RateLimitedClient;
//! use quotagate::limiter::LimiterConfig;
//!
//! let client = RateLimitedClient::new(reqwest::Client::new(), LimiterConfig::default());
//!
//! // The first two go out immediately, the third waits for the window
//! for page in 1..=3 {
//!     let request = client.get(format!("https://api.example.com/items?page={page}"));
//!     let response = client.send(request).await?;
//! }
//! ```

use reqwest::{IntoUrl, RequestBuilder, Response};
use tracing::debug;

use crate::error::ClientError;
use crate::limiter::{CancelToken, Limiter, LimiterConfig};

/// HTTP client whose requests pass through a [`Limiter`]
///
/// Response status codes are not inspected and failed calls are not retried
/// or refunded; only the quota headers matter here.
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    /// Reqwest HTTP client
    client: reqwest::Client,

    /// Admission gate shared by every request of this client
    limiter: Limiter,
}

impl RateLimitedClient {
    /// Wrap a client with a new limiter
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(client: reqwest::Client, config: LimiterConfig) -> Self {
        Self::with_limiter(client, Limiter::new(config))
    }

    /// Wrap a client with an existing limiter
    pub fn with_limiter(client: reqwest::Client, limiter: Limiter) -> Self {
        Self { client, limiter }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// The wrapped client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Start building a GET request
    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    /// Start building a POST request
    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.post(url)
    }

    /// Wait for admission, send, and reconcile the response headers
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        self.send_with_cancel(request, CancelToken::new()).await
    }

    /// Like [`send`](Self::send), abandoning the request if `cancel` fires
    /// before it is admitted
    pub async fn send_with_cancel(
        &self,
        request: RequestBuilder,
        cancel: CancelToken,
    ) -> Result<Response, ClientError> {
        let admission = self.limiter.request_admission_with(cancel);
        let ticket = admission.id();
        admission.await?;

        let response = request.send().await?;
        debug!(ticket, status = %response.status(), "Response received");

        self.limiter.on_response_headers(response.headers());
        Ok(response)
    }
}
