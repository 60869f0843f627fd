use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A single claimed entry in a sliding-window counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Unique member identifying this claim, used to release it again
    pub member: String,

    /// Claim time in microseconds since the Unix epoch
    pub at_micros: i64,
}

impl Slot {
    pub fn new(member: impl Into<String>, at_micros: i64) -> Self {
        Self { member: member.into(), at_micros }
    }
}

/// Atomic primitives a sliding-window limiter needs from the shared store
///
/// Entries whose timestamp is at or after a cutoff are "in the window"; older
/// entries are dead and may be discarded at any time.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Drop entries older than `slot.at_micros - window`, then record `slot` if
    /// fewer than `limit` entries remain. The three steps are one indivisible
    /// operation per key. Returns whether the slot was recorded.
    async fn claim_slot(&self, key: &str, slot: &Slot, limit: u64, window: Duration) -> Result<bool>;

    /// Remove a previously claimed entry. Unknown members are ignored.
    async fn release_slot(&self, key: &str, member: &str) -> Result<()>;

    /// Number of entries at or after `cutoff_micros`, without mutating the key
    async fn count_since(&self, key: &str, cutoff_micros: i64) -> Result<u64>;

    /// Timestamp of the oldest entry at or after `cutoff_micros`
    async fn oldest_since(&self, key: &str, cutoff_micros: i64) -> Result<Option<i64>>;

    /// Delete whole counters
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Round-trip health check
    async fn ping(&self) -> Result<()>;
}

/// Window length in microseconds, saturating for absurd durations
pub fn window_micros(window: Duration) -> i64 {
    i64::try_from(window.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_micros() {
        assert_eq!(window_micros(Duration::from_secs(60)), 60_000_000);
        assert_eq!(window_micros(Duration::from_millis(5)), 5_000);
        assert_eq!(window_micros(Duration::MAX), i64::MAX);
    }
}
