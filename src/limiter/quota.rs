//! Quota State
//!
//! The limiter's belief about the remote quota: how many requests may start
//! right now, the window limit, and when the window resets.

use std::time::Duration;
use tokio::time::Instant;

/// Current view of the remote quota window
///
/// `remaining` is local bookkeeping only. Server-reported remaining counts are
/// never copied in; capacity is restored exclusively by [`QuotaState::refill`].
#[derive(Debug, Clone)]
pub struct QuotaState {
    /// Last known maximum requests per window (always >= 1)
    limit: u32,

    /// Requests admittable without waiting
    remaining: i64,

    /// Instant after which the window is considered refreshed
    reset_at: Instant,
}

impl QuotaState {
    /// Create a quota whose window resets at `now`
    pub fn new(limit: u32, remaining: u32, now: Instant) -> Self {
        Self {
            limit: limit.max(1),
            remaining: i64::from(remaining),
            reset_at: now,
        }
    }

    /// Capacity granted by a refill for the given limit
    ///
    /// Deliberately below the full limit: `max(1, floor((limit - 1) / 4) * 2)`.
    pub fn refill_amount(limit: u32) -> u32 {
        ((limit.saturating_sub(1) / 4) * 2).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Remaining capacity, clamped at zero
    pub fn remaining(&self) -> u32 {
        u32::try_from(self.remaining.max(0)).unwrap_or(u32::MAX)
    }

    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    /// Whether at least one admission is allowed right now
    pub fn has_capacity(&self) -> bool {
        self.remaining > 0
    }

    /// Charge one admission
    pub fn consume(&mut self) {
        self.remaining -= 1;
    }

    /// Restore capacity at window expiry
    ///
    /// If the reset instant has already passed, a fresh window of
    /// `fresh_window` starting at `now` is assumed. Returns the new capacity.
    pub fn refill(&mut self, now: Instant, fresh_window: Duration) -> u32 {
        let amount = Self::refill_amount(self.limit);
        self.remaining = i64::from(amount);

        if self.reset_at <= now {
            self.reset_at = now + fresh_window;
        }

        amount
    }

    /// Adopt a server-reported window if it is not older than the current one
    ///
    /// Returns false, leaving the state untouched, for an older window.
    pub fn accept_window(&mut self, reset_at: Instant, limit: u32) -> bool {
        if reset_at < self.reset_at {
            return false;
        }

        self.reset_at = reset_at;
        self.limit = limit.max(1);
        true
    }

    /// Time left until the window resets (zero once passed)
    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }

    /// Delay for the next wake timer: `max(0, reset_at - now + margin)`
    pub fn wake_delay(&self, now: Instant, margin: Duration) -> Duration {
        (self.reset_at + margin).saturating_duration_since(now)
    }
}
