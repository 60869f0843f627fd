use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use gov_ledger::CreditLedger;
use gov_ledger::SqliteTransactionLog;
use gov_ratelimit::RateLimiter;
use gov_store::RedisStore;
use tracing::info;

use crate::config_loader::GovernanceConfig;

/// Rate limiter over the configured Redis, with the configured quota table
///
/// Does not connect; the first limiter call does.
pub fn rate_limiter(config: &GovernanceConfig) -> Result<RateLimiter> {
    let table = config.rate_limits.table();
    for arena in config.rate_limits.arenas.keys() {
        table.resolve(arena, None).validate().with_context(|| format!("Invalid rate limit for arena {arena}"))?;
    }
    table.global().validate().context("Invalid global rate limit")?;

    let store = RedisStore::open(&config.redis_url).with_context(|| format!("Invalid redis url {}", config.redis_url))?;
    Ok(RateLimiter::with_table(Arc::new(store), table).with_poll_interval(config.poll_interval()))
}

pub async fn credit_ledger(config: &GovernanceConfig) -> Result<CreditLedger> {
    let log = SqliteTransactionLog::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open transaction log {}", config.database_url))?;
    info!("Opened transaction log {}", config.database_url);
    Ok(CreditLedger::new(Arc::new(log)))
}

#[cfg(test)]
mod tests {
    use gov_ratelimit::RateLimitConfig;

    use super::*;

    #[test]
    fn test_rejects_zero_quota() {
        let mut config = GovernanceConfig::default();
        config.rate_limits.arenas.insert("youtube".to_string(), RateLimitConfig::per_minute(0));

        let err = rate_limiter(&config).unwrap_err();
        assert!(err.to_string().contains("youtube"));
    }

    #[test]
    fn test_builds_without_connecting() {
        let config = GovernanceConfig { redis_url: "redis://127.0.0.1:1/".to_string(), ..GovernanceConfig::default() };
        assert!(rate_limiter(&config).is_ok());
    }

    #[tokio::test]
    async fn test_opens_ledger_file() {
        let dir = tempfile::tempdir().unwrap();
        let database_url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let config = GovernanceConfig { database_url, ..GovernanceConfig::default() };

        let ledger = credit_ledger(&config).await.unwrap();
        assert_eq!(ledger.get_balance(uuid::Uuid::new_v4()).await.unwrap().available, 0);
    }
}
