use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Denied { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u64,
    window_index: u64,
}

/// Fixed-window request counters keyed by caller identity.
///
/// Approximate by design: windows are fixed, not sliding, so a burst
/// straddling a boundary can reach about twice the nominal rate. That is
/// acceptable for abuse mitigation. Counters are process-local; across
/// horizontally scaled instances the effective limit multiplies by the
/// instance count. Stale entries are overwritten lazily on next access,
/// never actively evicted.
#[derive(Clone, Default)]
pub struct RateLimiter {
    entries: Arc<RwLock<HashMap<String, RateLimitEntry>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and count one request for `key`.
    pub fn check(&self, key: &str, limit: u64, window_ms: u64) -> Result<RateDecision> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::Internal("system clock before Unix epoch".to_string()))?
            .as_millis() as u64;

        self.check_at(key, limit, window_ms, now_ms)
    }

    /// Clock-explicit variant of [`check`](Self::check).
    pub fn check_at(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<RateDecision> {
        if limit == 0 || window_ms == 0 {
            return Err(Error::Validation(
                "rate limit and window must be non-zero".to_string(),
            ));
        }

        let window_index = now_ms / window_ms;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Internal("rate limiter lock poisoned".to_string()))?;

        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_index,
        });

        // Lazy reset on rollover.
        if entry.window_index != window_index {
            entry.count = 0;
            entry.window_index = window_index;
        }

        if entry.count >= limit {
            let window_end_ms = (window_index + 1) * window_ms;
            let retry_after_secs = (window_end_ms - now_ms).div_ceil(1000);
            return Ok(RateDecision::Denied { retry_after_secs });
        }

        entry.count += 1;
        Ok(RateDecision::Allowed {
            remaining: limit - entry.count,
        })
    }
}
