use std::fmt::Debug;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall-clock source for claim timestamps
///
/// Timestamps are shared between processes through the coordination store, so
/// this must be Unix time rather than a process-local monotonic epoch.
pub trait Clock: Send + Sync + Debug {
    /// Current time in microseconds since the Unix epoch
    fn now_micros(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_micros(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_micros() as i64).unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start_micros: i64) -> Self {
        Self { micros: AtomicI64::new(start_micros) }
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(gov_store::window_micros(by), Ordering::SeqCst);
    }

    pub fn set(&self, micros: i64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.now_micros();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now_micros();

        assert!(t2 > t1);
        assert!(t2 - t1 >= 10_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_micros(), 1_000);

        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now_micros(), 3_000);

        clock.set(0);
        assert_eq!(clock.now_micros(), 0);
    }
}
