use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::store::CoordinationStore;
use crate::store::Slot;
use crate::store::window_micros;

/// Process-local coordination store
///
/// Counters live in a [`DashMap`]; holding the shard entry lock for the whole
/// trim-count-insert sequence gives the same per-key atomicity as the Redis
/// script. State is not shared across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Vec<Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the raw entries held for a counter, oldest first
    pub fn entries(&self, key: &str) -> Vec<Slot> {
        self.counters.get(key).map(|entries| entries.value().clone()).unwrap_or_default()
    }

    /// Number of counters currently held
    pub fn key_count(&self) -> usize {
        self.counters.len()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn claim_slot(&self, key: &str, slot: &Slot, limit: u64, window: Duration) -> Result<bool> {
        let cutoff = slot.at_micros.saturating_sub(window_micros(window));
        let mut entries = self.counters.entry(key.to_owned()).or_default();

        entries.retain(|existing| existing.at_micros >= cutoff);
        if entries.len() as u64 >= limit {
            return Ok(false);
        }

        // Keep entries ordered by time so the oldest is always first
        let position = entries.partition_point(|existing| existing.at_micros <= slot.at_micros);
        entries.insert(position, slot.clone());
        Ok(true)
    }

    async fn release_slot(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut entries) = self.counters.get_mut(key) {
            entries.retain(|existing| existing.member != member);
        }
        Ok(())
    }

    async fn count_since(&self, key: &str, cutoff_micros: i64) -> Result<u64> {
        let count = self
            .counters
            .get(key)
            .map(|entries| entries.iter().filter(|slot| slot.at_micros >= cutoff_micros).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn oldest_since(&self, key: &str, cutoff_micros: i64) -> Result<Option<i64>> {
        let oldest = self.counters.get(key).and_then(|entries| entries.iter().map(|slot| slot.at_micros).find(|at| *at >= cutoff_micros));
        Ok(oldest)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.counters.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
