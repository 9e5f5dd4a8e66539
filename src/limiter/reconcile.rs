//! Quota Reconciliation
//!
//! Merges server-reported quota headers into [`QuotaState`]. Only the limit
//! and the reset timestamp are authoritative; a window older than the one
//! already known is ignored so late responses cannot roll the state back.

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::config::{HeaderNames, DEFAULT_MAX_RESET_HORIZON_MS};
use super::quota::QuotaState;
use crate::error::MetadataParseError;

/// Largest reset timestamp accepted (9999-12-31T23:59:59Z)
pub const MAX_RESET_EPOCH_SECS: f64 = 253_402_300_799.0;

/// Quota metadata observed on one response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaMetadata {
    /// Reported requests per window
    pub limit: u32,

    /// Reported remaining requests (recorded, never applied)
    pub remaining: Option<i64>,

    /// Reported reset, in seconds since the Unix epoch (server clock)
    pub reset_epoch_secs: f64,
}

impl QuotaMetadata {
    pub fn new(limit: u32, remaining: Option<i64>, reset_epoch_secs: f64) -> Self {
        Self {
            limit,
            remaining,
            reset_epoch_secs,
        }
    }

    /// Parse raw header values
    ///
    /// Limit and reset are required. An absent or unparseable remaining value
    /// is recorded as `None` since it never affects the state.
    pub fn parse(
        names: &HeaderNames,
        limit: Option<&str>,
        remaining: Option<&str>,
        reset: Option<&str>,
    ) -> Result<Self, MetadataParseError> {
        let limit_raw = limit.ok_or_else(|| MetadataParseError::Missing(names.limit.clone()))?;
        let limit: u32 = limit_raw
            .trim()
            .parse()
            .map_err(|_| MetadataParseError::Invalid {
                header: names.limit.clone(),
                value: limit_raw.to_string(),
            })?;
        if limit == 0 {
            return Err(MetadataParseError::OutOfRange {
                header: names.limit.clone(),
                value: limit_raw.to_string(),
            });
        }

        let reset_raw = reset.ok_or_else(|| MetadataParseError::Missing(names.reset.clone()))?;
        let reset: f64 = reset_raw
            .trim()
            .parse()
            .map_err(|_| MetadataParseError::Invalid {
                header: names.reset.clone(),
                value: reset_raw.to_string(),
            })?;
        if !reset.is_finite() || !(0.0..=MAX_RESET_EPOCH_SECS).contains(&reset) {
            return Err(MetadataParseError::OutOfRange {
                header: names.reset.clone(),
                value: reset_raw.to_string(),
            });
        }

        let remaining = remaining.and_then(|v| v.trim().parse().ok());

        Ok(Self::new(limit, remaining, reset))
    }

    /// Parse the quota headers of a response
    pub fn from_headers(
        headers: &HeaderMap,
        names: &HeaderNames,
    ) -> Result<Self, MetadataParseError> {
        let value = |name: &str| -> Result<Option<&str>, MetadataParseError> {
            match headers.get(name) {
                None => Ok(None),
                Some(v) => v.to_str().map(Some).map_err(|_| MetadataParseError::Invalid {
                    header: name.to_string(),
                    value: String::from_utf8_lossy(v.as_bytes()).into_owned(),
                }),
            }
        };

        Self::parse(
            names,
            value(&names.limit)?,
            value(&names.remaining).ok().flatten(),
            value(&names.reset)?,
        )
    }

    /// Reset timestamp in milliseconds since the Unix epoch
    pub fn reset_epoch_millis(&self) -> i64 {
        (self.reset_epoch_secs * 1000.0) as i64
    }
}

/// Outcome of merging one response's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The reported window was adopted
    Accepted,
    /// The reported window is older than the known one and was ignored
    Stale,
    /// The reported reset lies beyond the configured horizon and was ignored
    OutOfRange,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Accepted => "accepted",
            MergeOutcome::Stale => "stale",
            MergeOutcome::OutOfRange => "out_of_range",
        }
    }
}

/// Applies response metadata to the quota state
#[derive(Debug, Clone)]
pub struct QuotaReconciler {
    /// Added to every reported reset
    reset_margin: Duration,

    /// Furthest ahead of the local clock a reset may be adopted
    max_horizon: Duration,
}

impl QuotaReconciler {
    pub fn new(reset_margin: Duration) -> Self {
        Self {
            reset_margin,
            max_horizon: Duration::from_millis(DEFAULT_MAX_RESET_HORIZON_MS),
        }
    }

    /// Replace the reset horizon
    pub fn with_max_horizon(mut self, max_horizon: Duration) -> Self {
        self.max_horizon = max_horizon;
        self
    }

    /// Milliseconds from `wall_now_ms` to the reported reset plus margin
    fn reset_delta_ms(&self, metadata: &QuotaMetadata, wall_now_ms: i64) -> i64 {
        let margin_ms = i64::try_from(self.reset_margin.as_millis()).unwrap_or(i64::MAX);
        metadata
            .reset_epoch_millis()
            .saturating_add(margin_ms)
            .saturating_sub(wall_now_ms)
    }

    /// Convert a server reset timestamp into a local instant
    ///
    /// `wall_now_ms` is the local wall clock (Unix milliseconds) sampled at
    /// the same moment as `now`. Returns `None` if the instant is not
    /// representable, which the merge treats as stale.
    pub fn candidate_reset(
        &self,
        metadata: &QuotaMetadata,
        now: Instant,
        wall_now_ms: i64,
    ) -> Option<Instant> {
        let delta_ms = self.reset_delta_ms(metadata, wall_now_ms);

        if delta_ms >= 0 {
            now.checked_add(Duration::from_millis(delta_ms as u64))
        } else {
            now.checked_sub(Duration::from_millis(delta_ms.unsigned_abs()))
        }
    }

    /// Merge metadata into the state
    ///
    /// Adopts the reported limit and reset together when the reset is not
    /// older than the current one and lies within the horizon; otherwise
    /// leaves the state untouched.
    pub fn merge(
        &self,
        state: &mut QuotaState,
        metadata: &QuotaMetadata,
        now: Instant,
        wall_now_ms: i64,
    ) -> MergeOutcome {
        let horizon_ms = i64::try_from(self.max_horizon.as_millis()).unwrap_or(i64::MAX);
        if self.reset_delta_ms(metadata, wall_now_ms) > horizon_ms {
            return MergeOutcome::OutOfRange;
        }

        match self.candidate_reset(metadata, now, wall_now_ms) {
            Some(reset_at) if state.accept_window(reset_at, metadata.limit) => {
                MergeOutcome::Accepted
            }
            _ => MergeOutcome::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const WALL_NOW_MS: i64 = 1_700_000_000_000;

    fn names() -> HeaderNames {
        HeaderNames::default()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_headers() {
        let map = headers(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-reset", "1700000010"),
        ]);

        let metadata = QuotaMetadata::from_headers(&map, &names()).unwrap();
        assert_eq!(metadata.limit, 5);
        assert_eq!(metadata.remaining, Some(3));
        assert_eq!(metadata.reset_epoch_millis(), 1_700_000_010_000);
    }

    #[test]
    fn test_parse_fractional_reset() {
        let metadata =
            QuotaMetadata::parse(&names(), Some("2"), None, Some("1700000000.5")).unwrap();
        assert_eq!(metadata.reset_epoch_millis(), 1_700_000_000_500);
        assert_eq!(metadata.remaining, None);
    }

    #[test]
    fn test_parse_missing_header() {
        let map = headers(&[("x-ratelimit-limit", "5")]);
        let err = QuotaMetadata::from_headers(&map, &names()).unwrap_err();
        assert_eq!(
            err,
            MetadataParseError::Missing("x-ratelimit-reset".to_string())
        );
    }

    #[test]
    fn test_parse_non_numeric() {
        let map = headers(&[("x-ratelimit-limit", "five"), ("x-ratelimit-reset", "1")]);
        let err = QuotaMetadata::from_headers(&map, &names()).unwrap_err();
        assert!(matches!(err, MetadataParseError::Invalid { .. }));
    }

    #[test]
    fn test_parse_out_of_range() {
        assert!(matches!(
            QuotaMetadata::parse(&names(), Some("0"), None, Some("1")),
            Err(MetadataParseError::OutOfRange { .. })
        ));
        assert!(matches!(
            QuotaMetadata::parse(&names(), Some("2"), None, Some("-4")),
            Err(MetadataParseError::OutOfRange { .. })
        ));
        assert!(matches!(
            QuotaMetadata::parse(&names(), Some("2"), None, Some("inf")),
            Err(MetadataParseError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_garbage_remaining_is_ignored() {
        let metadata =
            QuotaMetadata::parse(&names(), Some("2"), Some("??"), Some("1700000000")).unwrap();
        assert_eq!(metadata.remaining, None);
    }

    #[test]
    fn test_custom_header_names() {
        let custom = HeaderNames {
            limit: "ratelimit-limit".to_string(),
            remaining: "ratelimit-remaining".to_string(),
            reset: "ratelimit-reset".to_string(),
        };
        let map = headers(&[("ratelimit-limit", "9"), ("ratelimit-reset", "1700000000")]);
        let metadata = QuotaMetadata::from_headers(&map, &custom).unwrap();
        assert_eq!(metadata.limit, 9);
    }

    #[test]
    fn test_candidate_reset_adds_margin() {
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000));
        let now = Instant::now();
        let metadata = QuotaMetadata::new(5, None, (WALL_NOW_MS / 1000 + 10) as f64);

        let candidate = reconciler
            .candidate_reset(&metadata, now, WALL_NOW_MS)
            .unwrap();
        assert_eq!(candidate - now, Duration::from_secs(11));
    }

    #[test]
    fn test_merge_accepts_later_window() {
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000));
        let now = Instant::now();
        let mut state = QuotaState::new(2, 2, now);
        state.accept_window(now + Duration::from_secs(2), 2);

        let metadata = QuotaMetadata::new(5, Some(4), (WALL_NOW_MS / 1000 + 10) as f64);
        let outcome = reconciler.merge(&mut state, &metadata, now, WALL_NOW_MS);

        assert_eq!(outcome, MergeOutcome::Accepted);
        assert_eq!(state.limit(), 5);
        assert_eq!(state.reset_at(), now + Duration::from_secs(11));
        assert_eq!(state.remaining(), 2);
    }

    #[test]
    fn test_merge_ignores_older_window() {
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000));
        let now = Instant::now();
        let mut state = QuotaState::new(2, 2, now);
        state.accept_window(now + Duration::from_secs(11), 5);

        let metadata = QuotaMetadata::new(9, None, (WALL_NOW_MS / 1000 + 3) as f64);
        let outcome = reconciler.merge(&mut state, &metadata, now, WALL_NOW_MS);

        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(state.limit(), 5);
        assert_eq!(state.reset_at(), now + Duration::from_secs(11));
    }

    #[test]
    fn test_merge_reset_in_the_past_is_stale() {
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000));
        let now = Instant::now();
        let mut state = QuotaState::new(2, 2, now);

        let metadata = QuotaMetadata::new(9, None, (WALL_NOW_MS / 1000 - 60) as f64);
        assert_eq!(
            reconciler.merge(&mut state, &metadata, now, WALL_NOW_MS),
            MergeOutcome::Stale
        );
        assert_eq!(state.limit(), 2);
    }

    #[test]
    fn test_merge_rejects_reset_beyond_horizon() {
        let reconciler = QuotaReconciler::new(Duration::from_millis(1000))
            .with_max_horizon(Duration::from_secs(3600));
        let now = Instant::now();
        let mut state = QuotaState::new(2, 2, now);

        // Decades ahead: adopting it would stall the queue until then
        let far = QuotaMetadata::new(50, None, (WALL_NOW_MS / 1000 + 30 * 365 * 86_400) as f64);
        assert_eq!(
            reconciler.merge(&mut state, &far, now, WALL_NOW_MS),
            MergeOutcome::OutOfRange
        );
        assert_eq!(state.limit(), 2);
        assert_eq!(state.reset_at(), now);

        // Just inside the horizon once the margin is added
        let near = QuotaMetadata::new(50, None, (WALL_NOW_MS / 1000 + 3599) as f64);
        assert_eq!(
            reconciler.merge(&mut state, &near, now, WALL_NOW_MS),
            MergeOutcome::Accepted
        );
        assert_eq!(state.reset_at(), now + Duration::from_secs(3600));
    }
}
