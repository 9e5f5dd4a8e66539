//! Property-Based Tests for the Admission Gate
//!
//! # Test Strategies
//!
//! - **FIFO admission**: with capacity `k`, exactly the first `k` live tickets
//!   are admitted, cancelled tickets ahead of them are rejected, and nothing
//!   behind the last admitted ticket is touched
//! - **Refill bounds**: refill capacity is at least one and below the limit
//!   whenever the limit allows it
//! - **Monotonic window**: no sequence of merges moves the reset backwards
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib limiter::proptests
//! ```

use futures::FutureExt;
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::AdmissionError;
use crate::limiter::{
    CancelToken, Limiter, LimiterConfig, QuotaMetadata, QuotaReconciler, QuotaState,
};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

// ============================================================================
// Property 1: FIFO admission
// ============================================================================

proptest! {
    #[test]
    fn prop_admission_is_fifo(
        capacity in 0u32..8,
        cancelled in prop::collection::vec(any::<bool>(), 0..24)
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let limiter = Limiter::new(LimiterConfig {
                initial_limit: capacity.max(1),
                initial_remaining: capacity,
                ..LimiterConfig::default()
            });

            let mut tickets: Vec<_> = cancelled
                .iter()
                .map(|&cancel| {
                    let token = CancelToken::new();
                    if cancel {
                        token.cancel();
                    }
                    limiter.request_admission_with(token)
                })
                .collect();

            // Walk the queue the way the scheduler must
            let mut left = capacity;
            let mut expected = Vec::new();
            for &cancel in &cancelled {
                if left == 0 {
                    expected.push(None);
                } else if cancel {
                    expected.push(Some(Err(AdmissionError::Cancelled)));
                } else {
                    left -= 1;
                    expected.push(Some(Ok(())));
                }
            }

            let observed: Vec<_> = tickets
                .iter_mut()
                .map(|ticket| ticket.now_or_never())
                .collect();

            prop_assert_eq!(observed, expected);
            prop_assert_eq!(limiter.snapshot().remaining, left);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// Property 2: Refill bounds
// ============================================================================

proptest! {
    #[test]
    fn prop_refill_bounds(limit in 1u32..100_000) {
        let amount = QuotaState::refill_amount(limit);
        prop_assert!(amount >= 1);
        if limit > 1 {
            prop_assert!(amount < limit);
        }
        if amount > 1 {
            prop_assert_eq!(amount % 2, 0);
        }
    }
}

// ============================================================================
// Property 3: Monotonic reset window
// ============================================================================

proptest! {
    #[test]
    fn prop_reset_never_moves_backwards(
        updates in prop::collection::vec((1u32..500, 0i64..120), 1..20)
    ) {
        let wall_now_ms: i64 = 1_700_000_000_000;
        let now = Instant::now();
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000));
        let mut state = QuotaState::new(2, 2, now);

        for (limit, offset_secs) in updates {
            let before = state.reset_at();
            let metadata = QuotaMetadata::new(
                limit,
                None,
                (wall_now_ms / 1000 + offset_secs) as f64,
            );
            reconciler.merge(&mut state, &metadata, now, wall_now_ms);
            prop_assert!(state.reset_at() >= before);
        }
    }
}
