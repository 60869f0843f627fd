use std::sync::Arc;
use std::time::Duration;

use gov_store::CoordinationStore;
use gov_store::Slot;
use gov_store::window_micros;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::arenas::RateLimitTable;
use crate::config::RateLimitConfig;
use crate::config::Window;
use crate::config::counter_key;
use crate::error::RateLimitError;
use crate::error::Result;
use crate::health::StoreHealth;
use crate::time::Clock;
use crate::time::SystemClock;

/// Interval between attempts in [`RateLimiter::wait_for_slot`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sliding-window rate limiter shared by every worker through a coordination store
///
/// Write paths fail open and read paths report "not limited" when the store
/// is unreachable. Each such failure is recorded in [`StoreHealth`].
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
    table: RateLimitTable,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    health: Arc<StoreHealth>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("table", &self.table)
            .field("clock", &self.clock)
            .field("poll_interval", &self.poll_interval)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter using the standard arena presets
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_table(store, RateLimitTable::standard())
    }

    pub fn with_table(store: Arc<dyn CoordinationStore>, table: RateLimitTable) -> Self {
        Self { store, table, clock: Arc::new(SystemClock), poll_interval: DEFAULT_POLL_INTERVAL, health: Arc::new(StoreHealth::new()) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    pub fn health(&self) -> Arc<StoreHealth> {
        Arc::clone(&self.health)
    }

    /// Claim one slot on `key` if fewer than `max_calls` claims fall inside the window.
    ///
    /// Returns true when the store is unreachable.
    pub async fn acquire(&self, key: &str, max_calls: u32, window: Duration) -> bool {
        match self.claim(key, max_calls, window).await {
            Ok(slot) => slot.is_some(),
            Err(err) => {
                self.health.record_failure("acquire", key, &err);
                true
            }
        }
    }

    /// Claim one slot in every configured window of `arena`/`provider`.
    ///
    /// Windows are claimed minute, hour, day. If a later window is full, the
    /// slots already taken for this call are released again so a refused
    /// request consumes no capacity.
    pub async fn check_and_acquire(&self, arena: &str, provider: &str, config: Option<&RateLimitConfig>, key_suffix: &str) -> bool {
        let config = self.table.resolve(arena, config);
        let mut claimed: Vec<(String, Slot)> = Vec::with_capacity(3);

        for (window, limit) in config.limits() {
            let key = counter_key(arena, provider, key_suffix, window);

            match self.claim(&key, limit, window.duration()).await {
                Ok(Some(slot)) => claimed.push((key, slot)),
                Ok(None) => {
                    debug!("Rate limit reached on {key} ({limit} per {window}), releasing {} earlier claims", claimed.len());
                    self.release_all(&claimed).await;
                    return false;
                }
                Err(err) => {
                    self.health.record_failure("check_and_acquire", &key, &err);
                    return true;
                }
            }
        }

        true
    }

    /// Whether any configured window is already at capacity. Claims nothing.
    pub async fn is_rate_limited(&self, arena: &str, provider: &str, config: Option<&RateLimitConfig>, key_suffix: &str) -> bool {
        let config = self.table.resolve(arena, config);
        let now = self.clock.now_micros();

        match self.first_exhausted(arena, provider, &config, key_suffix, now).await {
            Ok(exhausted) => exhausted.is_some(),
            Err((key, err)) => {
                self.health.record_failure("is_rate_limited", &key, &err);
                false
            }
        }
    }

    /// Time until the oldest claim in the first exhausted window ages out.
    ///
    /// Zero when nothing is limited or the store is unreachable.
    pub async fn get_wait_time(&self, arena: &str, provider: &str, config: Option<&RateLimitConfig>, key_suffix: &str) -> Duration {
        let config = self.table.resolve(arena, config);
        let now = self.clock.now_micros();

        let (key, window) = match self.first_exhausted(arena, provider, &config, key_suffix, now).await {
            Ok(Some(exhausted)) => exhausted,
            Ok(None) => return Duration::ZERO,
            Err((key, err)) => {
                self.health.record_failure("get_wait_time", &key, &err);
                return Duration::ZERO;
            }
        };

        let window_len = window_micros(window.duration());
        match self.store.oldest_since(&key, now.saturating_sub(window_len)).await {
            Ok(Some(oldest)) => {
                let remaining = window_len - now.saturating_sub(oldest);
                Duration::from_micros(remaining.max(0) as u64)
            }
            Ok(None) => Duration::ZERO,
            Err(err) => {
                self.health.record_failure("get_wait_time", &key, &err);
                Duration::ZERO
            }
        }
    }

    /// Poll [`acquire`](Self::acquire) at a fixed interval until it succeeds or `timeout` has elapsed
    pub async fn wait_for_slot(&self, key: &str, max_calls: u32, window: Duration, timeout: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();

        loop {
            if self.acquire(key, max_calls, window).await {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(RateLimitError::Timeout { key: key.to_string(), timeout });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Delete every window counter of one credential. Store errors are swallowed.
    pub async fn reset(&self, arena: &str, provider: &str, key_suffix: &str) {
        let keys: Vec<String> = Window::ALL.iter().map(|window| counter_key(arena, provider, key_suffix, *window)).collect();

        match self.store.delete(&keys).await {
            Ok(()) => info!("Reset rate limit counters for {arena}/{provider}/{key_suffix}"),
            Err(err) => self.health.record_failure("reset", &keys[0], &err),
        }
    }

    /// Whether the coordination store answers at all
    pub async fn store_reachable(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                self.health.record_failure("ping", "", &err);
                false
            }
        }
    }

    async fn claim(&self, key: &str, max_calls: u32, window: Duration) -> gov_store::Result<Option<Slot>> {
        let now = self.clock.now_micros();
        let slot = Slot::new(format!("{now}-{}", Uuid::new_v4().simple()), now);

        if self.store.claim_slot(key, &slot, u64::from(max_calls), window).await? { Ok(Some(slot)) } else { Ok(None) }
    }

    async fn release_all(&self, claimed: &[(String, Slot)]) {
        for (key, slot) in claimed.iter().rev() {
            if let Err(err) = self.store.release_slot(key, &slot.member).await {
                self.health.record_failure("rollback", key, &err);
            }
        }
    }

    async fn first_exhausted(
        &self,
        arena: &str,
        provider: &str,
        config: &RateLimitConfig,
        key_suffix: &str,
        now: i64,
    ) -> std::result::Result<Option<(String, Window)>, (String, gov_store::StoreError)> {
        for (window, limit) in config.limits() {
            let key = counter_key(arena, provider, key_suffix, window);
            let cutoff = now.saturating_sub(window_micros(window.duration()));

            match self.store.count_since(&key, cutoff).await {
                Ok(count) if count >= u64::from(limit) => return Ok(Some((key, window))),
                Ok(_) => {}
                Err(err) => return Err((key, err)),
            }
        }

        Ok(None)
    }
}
