use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::error::StoreError;
use crate::script::CLAIM_SLOT;
use crate::script::CachedScript;
use crate::store::CoordinationStore;
use crate::store::Slot;
use crate::store::window_micros;

/// Redis-backed coordination store
///
/// Each counter is a sorted set scored by claim time in microseconds. The
/// connection is opened on first use and the multiplexed manager reconnects on
/// its own afterwards, so constructing a store never touches the network.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    claim_script: CachedScript,
}

impl RedisStore {
    /// Create a store for a `redis://` URL without connecting
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client, connection: OnceCell::new(), claim_script: CachedScript::new(CLAIM_SLOT) })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self.connection.get_or_try_init(|| ConnectionManager::new(self.client.clone())).await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn claim_slot(&self, key: &str, slot: &Slot, limit: u64, window: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let cutoff = slot.at_micros.saturating_sub(window_micros(window));
        // Idle counters expire one window after their newest claim
        let ttl_ms = window.as_millis().max(1);
        let args = [format!("({cutoff}"), limit.to_string(), slot.at_micros.to_string(), slot.member.clone(), ttl_ms.to_string()];

        let claimed: i64 = self.claim_script.invoke(&mut conn, &[key], &args).await?;
        Ok(claimed == 1)
    }

    async fn release_slot(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(())
    }

    async fn count_since(&self, key: &str, cutoff_micros: i64) -> Result<u64> {
        let mut conn = self.connection().await?;
        let count: u64 = redis::cmd("ZCOUNT").arg(key).arg(cutoff_micros).arg("+inf").query_async(&mut conn).await?;
        Ok(count)
    }

    async fn oldest_since(&self, key: &str, cutoff_micros: i64) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(cutoff_micros)
            .arg("+inf")
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(entries.first().map(|(_, score)| *score as i64))
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_str());
        }
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" { Ok(()) } else { Err(StoreError::UnexpectedReply(reply)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_does_not_connect() {
        // Nothing listens on port 1; opening must still succeed
        assert!(RedisStore::open("redis://127.0.0.1:1/").is_ok());
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(matches!(RedisStore::open("not a url"), Err(StoreError::Redis(_))));
    }
}
