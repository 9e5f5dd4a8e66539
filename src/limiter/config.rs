//! Limiter Configuration
//!
//! Tunables for the admission gate. The defaults assume two requests per
//! second until the remote service reports its real quota.

use anyhow::Result;
use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default quota assumptions before any response has been seen
pub const DEFAULT_INITIAL_LIMIT: u32 = 2;
pub const DEFAULT_INITIAL_REMAINING: u32 = 2;

/// Added to every server-reported reset (the header only has second precision)
pub const DEFAULT_RESET_MARGIN_MS: u64 = 1000;

/// Added to every wake timer delay so it never fires before the reset
pub const DEFAULT_WAKE_MARGIN_MS: u64 = 100;

/// Length of the window started when a refill finds the reset already passed
pub const DEFAULT_FRESH_WINDOW_MS: u64 = 1000;

/// Furthest into the future a reported reset may lie (one day)
pub const DEFAULT_MAX_RESET_HORIZON_MS: u64 = 86_400_000;

pub const DEFAULT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const DEFAULT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const DEFAULT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Quota limit assumed until the first response arrives
    pub initial_limit: u32,

    /// Capacity available to the first burst of requests
    pub initial_remaining: u32,

    /// Safety margin added to server reset timestamps, in milliseconds
    pub reset_margin_ms: u64,

    /// Safety margin added to wake timer delays, in milliseconds
    pub wake_margin_ms: u64,

    /// Window length used when a refill finds the reset in the past
    pub fresh_window_ms: u64,

    /// Reported resets further ahead than this are ignored, in milliseconds
    pub max_reset_horizon_ms: u64,

    /// Response headers carrying the quota
    pub headers: HeaderNames,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_limit: DEFAULT_INITIAL_LIMIT,
            initial_remaining: DEFAULT_INITIAL_REMAINING,
            reset_margin_ms: DEFAULT_RESET_MARGIN_MS,
            wake_margin_ms: DEFAULT_WAKE_MARGIN_MS,
            fresh_window_ms: DEFAULT_FRESH_WINDOW_MS,
            max_reset_horizon_ms: DEFAULT_MAX_RESET_HORIZON_MS,
            headers: HeaderNames::default(),
        }
    }
}

impl LimiterConfig {
    /// Create a new limiter configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (environment variables in practice)
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup("QUOTAGATE_INITIAL_LIMIT").and_then(|v| v.parse().ok()) {
            self.initial_limit = limit;
        }

        if let Some(remaining) =
            lookup("QUOTAGATE_INITIAL_REMAINING").and_then(|v| v.parse().ok())
        {
            self.initial_remaining = remaining;
        }

        if let Some(margin) = lookup("QUOTAGATE_RESET_MARGIN_MS").and_then(|v| v.parse().ok()) {
            self.reset_margin_ms = margin;
        }

        if let Some(margin) = lookup("QUOTAGATE_WAKE_MARGIN_MS").and_then(|v| v.parse().ok()) {
            self.wake_margin_ms = margin;
        }

        if let Some(horizon) =
            lookup("QUOTAGATE_MAX_RESET_HORIZON_MS").and_then(|v| v.parse().ok())
        {
            self.max_reset_horizon_ms = horizon;
        }

        self
    }

    /// Get reset margin
    pub fn reset_margin(&self) -> Duration {
        Duration::from_millis(self.reset_margin_ms)
    }

    /// Get wake timer margin
    pub fn wake_margin(&self) -> Duration {
        Duration::from_millis(self.wake_margin_ms)
    }

    /// Get fresh window length
    pub fn fresh_window(&self) -> Duration {
        Duration::from_millis(self.fresh_window_ms)
    }

    /// Get the reset horizon
    pub fn max_reset_horizon(&self) -> Duration {
        Duration::from_millis(self.max_reset_horizon_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.initial_limit == 0 {
            anyhow::bail!("Initial limit must be >= 1");
        }
        if self.max_reset_horizon_ms <= self.reset_margin_ms {
            anyhow::bail!(
                "Reset horizon ({}ms) must exceed the reset margin ({}ms)",
                self.max_reset_horizon_ms,
                self.reset_margin_ms
            );
        }
        self.headers.validate()
    }
}

/// Names of the response headers that carry quota metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
    pub limit: String,
    pub remaining: String,
    pub reset: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT_HEADER.to_string(),
            remaining: DEFAULT_REMAINING_HEADER.to_string(),
            reset: DEFAULT_RESET_HEADER.to_string(),
        }
    }
}

impl HeaderNames {
    /// Check every name is a legal HTTP header name
    pub fn validate(&self) -> Result<()> {
        for name in [&self.limit, &self.remaining, &self.reset] {
            if name.is_empty() {
                anyhow::bail!("Quota header names must not be empty");
            }
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow::anyhow!("Invalid header name {:?}: {}", name, e))?;
        }
        Ok(())
    }
}
