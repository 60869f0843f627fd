use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use gov_store::StoreError;
use parking_lot::Mutex;
use serde::Serialize;

/// Tracks coordination store failures seen by a limiter
///
/// Every failure means a request was let through without throttling. The
/// counter lets operators notice that provider quotas are unprotected.
#[derive(Debug, Default)]
pub struct StoreHealth {
    failures: AtomicU64,
    last_failure_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`StoreHealth`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub failures: u64,
    pub last_failure_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, operation: &'static str, key: &str, err: &StoreError) {
        let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis() as u64).unwrap_or(0);
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());

        tracing::warn!(operation, key, failures = total, "Coordination store unreachable, rate limiting disabled for this call: {err}");
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_failure_ms(&self) -> Option<u64> {
        match self.last_failure_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot { failures: self.failures(), last_failure_ms: self.last_failure_ms(), last_error: self.last_error.lock().clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let health = StoreHealth::new();
        assert_eq!(health.snapshot(), HealthSnapshot { failures: 0, last_failure_ms: None, last_error: None });
    }

    #[test]
    fn test_records_failures() {
        let health = StoreHealth::new();
        health.record_failure("acquire", "ratelimit:a:b:default:minute", &StoreError::Connection("refused".to_string()));
        health.record_failure("reset", "ratelimit:a:b:default:hour", &StoreError::Connection("timeout".to_string()));

        let snapshot = health.snapshot();
        assert_eq!(snapshot.failures, 2);
        assert!(snapshot.last_failure_ms.is_some());
        assert_eq!(snapshot.last_error.as_deref(), Some("Coordination store unavailable: timeout"));
    }
}
