//! Retry delay policy for transient sync failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter and a hard ceiling.
///
/// The raw delay doubles per attempt from `base` up to `cap`. Up to a
/// quarter of the raw delay is added as jitter so clients that failed
/// together do not retry in lockstep; the jittered result still never
/// exceeds `cap`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub(crate) fn new(base_ms: u64, cap_ms: u64) -> Self {
        let base_ms = base_ms.max(1);
        Self {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms.max(base_ms)),
        }
    }

    /// Delay before retry `attempt` (zero-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        let spread = raw.as_millis() as u64 / 4;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        (raw + Duration::from_millis(jitter)).min(self.cap)
    }

    fn raw_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.cap)
    }
}
