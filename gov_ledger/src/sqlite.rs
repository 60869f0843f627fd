use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Executor;
use sqlx::Row;
use sqlx::Sqlite;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use time::Date;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Result;
use crate::log::TransactionLog;
use crate::types::CreditAllocation;
use crate::types::CreditBalance;
use crate::types::CreditScope;
use crate::types::CreditTransaction;
use crate::types::HistoryCursor;
use crate::types::NewTransaction;
use crate::types::SettlementReceipt;
use crate::types::Tier;
use crate::types::TransactionType;
use crate::types::unix_micros;

// Dates are stored as Julian day numbers and timestamps as Unix microseconds,
// so range checks and keyset ordering are plain integer comparisons.
const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS credit_allocations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        credits_amount INTEGER NOT NULL,
        valid_from INTEGER NOT NULL,
        valid_until INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS credit_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        collection_run_id TEXT NOT NULL,
        arena TEXT NOT NULL,
        platform TEXT NOT NULL,
        tier TEXT NOT NULL,
        credits_consumed INTEGER NOT NULL,
        transaction_type TEXT NOT NULL CHECK (transaction_type IN ('reservation', 'settlement', 'refund')),
        created_at INTEGER NOT NULL,
        description TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_credit_transactions_history ON credit_transactions (user_id, created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_credit_transactions_scope ON credit_transactions (collection_run_id, arena, platform)",
];

const INSERT_ALLOCATION: &str = "INSERT INTO credit_allocations (user_id, credits_amount, valid_from, valid_until) VALUES (?, ?, ?, ?)";

const INSERT_TRANSACTION: &str = "INSERT INTO credit_transactions
    (user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

// Per-scope totals. A scope is charged what it still holds (reserved minus refunded)
// or what it settled at, whichever is larger, and never less than zero.
const SCOPE_TOTALS: &str = "SELECT
        SUM(CASE transaction_type WHEN 'reservation' THEN credits_consumed ELSE 0 END) AS reserved,
        SUM(CASE transaction_type WHEN 'settlement' THEN credits_consumed ELSE 0 END) AS settled,
        SUM(CASE transaction_type WHEN 'refund' THEN credits_consumed ELSE 0 END) AS refunded
    FROM credit_transactions WHERE user_id = ?
    GROUP BY collection_run_id, arena, platform";

const ALLOCATED: &str = "SELECT COALESCE(SUM(credits_amount), 0) FROM credit_allocations
    WHERE user_id = ? AND valid_from <= ? AND (valid_until IS NULL OR valid_until >= ?)";

fn insert_reservation_if_covered() -> String {
    format!(
        "INSERT INTO credit_transactions
            (user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description)
        SELECT ?, ?, ?, ?, ?, ?, 'reservation', ?, ?
        WHERE ({ALLOCATED})
            - (SELECT COALESCE(SUM(MAX(reserved - refunded, settled)), 0) FROM ({SCOPE_TOTALS}))
            >= ?"
    )
}

fn balance_totals() -> String {
    format!(
        "SELECT COALESCE(SUM(reserved), 0), COALESCE(SUM(MAX(settled - reserved + refunded, 0)), 0), COALESCE(SUM(refunded), 0)
        FROM ({SCOPE_TOTALS})"
    )
}

const HELD_FOR_SCOPE: &str = "SELECT
        COALESCE(SUM(CASE transaction_type WHEN 'reservation' THEN credits_consumed ELSE 0 END), 0),
        COALESCE(SUM(CASE transaction_type WHEN 'refund' THEN credits_consumed ELSE 0 END), 0)
    FROM credit_transactions
    WHERE user_id = ? AND collection_run_id = ? AND arena = ? AND platform = ?";

const INSERT_REFUND_IF_OPEN: &str = "INSERT INTO credit_transactions
    (user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description)
    SELECT ?, ?, ?, ?, ?, ?, 'refund', ?, ?
    WHERE NOT EXISTS (
        SELECT 1 FROM credit_transactions
        WHERE user_id = ? AND collection_run_id = ? AND arena = ? AND platform = ?
          AND transaction_type IN ('settlement', 'refund'))";

const HISTORY_FIRST_PAGE: &str = "SELECT
    id, user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description
    FROM credit_transactions
    WHERE user_id = ?
    ORDER BY created_at DESC, id DESC
    LIMIT ?";

const HISTORY_AFTER_CURSOR: &str = "SELECT
    id, user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description
    FROM credit_transactions
    WHERE user_id = ? AND (created_at < ? OR (created_at = ? AND id < ?))
    ORDER BY created_at DESC, id DESC
    LIMIT ?";

const SCOPE_TRANSACTIONS: &str = "SELECT
    id, user_id, collection_run_id, arena, platform, tier, credits_consumed, transaction_type, created_at, description
    FROM credit_transactions
    WHERE user_id = ? AND collection_run_id = ? AND arena = ? AND platform = ?
    ORDER BY created_at, id";

const ORPHANED_RESERVATIONS: &str = "SELECT
    r.id, r.user_id, r.collection_run_id, r.arena, r.platform,
    r.tier, r.credits_consumed, r.transaction_type, r.created_at, r.description
    FROM credit_transactions r
    WHERE r.transaction_type = 'reservation' AND r.created_at < ?
      AND NOT EXISTS (
        SELECT 1 FROM credit_transactions t
        WHERE t.user_id = r.user_id AND t.collection_run_id = r.collection_run_id
          AND t.arena = r.arena AND t.platform = r.platform
          AND t.transaction_type IN ('settlement', 'refund'))
    ORDER BY r.created_at, r.id";

/// Transaction log in a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteTransactionLog {
    pool: SqlitePool,
}

impl SqliteTransactionLog {
    /// Open (creating if needed) the database at a `sqlite:` URL and ensure the schema exists
    pub async fn connect(url: &str) -> Result<Self> {
        Self::open(SqliteConnectOptions::from_str(url)?, 8).await
    }

    pub async fn connect_file(path: &Path) -> Result<Self> {
        Self::open(SqliteConnectOptions::new().filename(path), 8).await
    }

    /// Private in-memory database, kept alive on a single connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None).connect_with(options).await?;
        let log = Self { pool };
        log.init_schema().await?;
        Ok(log)
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let options = options.create_if_missing(true).journal_mode(SqliteJournalMode::Wal).busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
        let log = Self { pool };
        log.init_schema().await?;
        Ok(log)
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_row<'e, E>(executor: E, row: &NewTransaction, kind: TransactionType) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(INSERT_TRANSACTION)
        .bind(row.scope.user_id.to_string())
        .bind(row.scope.collection_run_id.to_string())
        .bind(row.scope.arena.as_str())
        .bind(row.scope.platform.as_str())
        .bind(row.scope.tier.as_str())
        .bind(row.credits)
        .bind(kind.as_str())
        .bind(unix_micros(row.created_at))
        .bind(row.description.as_str())
        .execute(executor)
        .await?;
    Ok(result.last_insert_rowid())
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(err: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

/// Decode a row selected in the column order of the history queries
fn decode_transaction(row: &SqliteRow) -> std::result::Result<CreditTransaction, sqlx::Error> {
    let user_id: String = row.try_get(1)?;
    let collection_run_id: String = row.try_get(2)?;
    let tier: String = row.try_get(5)?;
    let transaction_type: String = row.try_get(7)?;
    let created_at: i64 = row.try_get(8)?;
    let description: Option<String> = row.try_get(9)?;

    Ok(CreditTransaction {
        id: row.try_get(0)?,
        user_id: Uuid::parse_str(&user_id).map_err(decode_err)?,
        collection_run_id: Uuid::parse_str(&collection_run_id).map_err(decode_err)?,
        arena: row.try_get(3)?,
        platform: row.try_get(4)?,
        tier: tier.parse::<Tier>().map_err(decode_err)?,
        credits_consumed: row.try_get(6)?,
        transaction_type: transaction_type.parse::<TransactionType>().map_err(decode_err)?,
        created_at: OffsetDateTime::from_unix_timestamp_nanos(i128::from(created_at) * 1_000).map_err(decode_err)?,
        description: description.unwrap_or_default(),
    })
}

fn decode_all(rows: &[SqliteRow]) -> Result<Vec<CreditTransaction>> {
    Ok(rows.iter().map(decode_transaction).collect::<std::result::Result<Vec<_>, _>>()?)
}

#[async_trait]
impl TransactionLog for SqliteTransactionLog {
    async fn insert_allocation(&self, allocation: &CreditAllocation) -> Result<i64> {
        let result = sqlx::query(INSERT_ALLOCATION)
            .bind(allocation.user_id.to_string())
            .bind(allocation.credits_amount)
            .bind(allocation.valid_from.to_julian_day())
            .bind(allocation.valid_until.map(Date::to_julian_day))
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn append_reservation_if_covered(&self, row: &NewTransaction, today: Date) -> Result<Option<i64>> {
        let user_id = row.scope.user_id.to_string();
        let today = today.to_julian_day();

        let sql = insert_reservation_if_covered();
        let result = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(row.scope.collection_run_id.to_string())
            .bind(row.scope.arena.as_str())
            .bind(row.scope.platform.as_str())
            .bind(row.scope.tier.as_str())
            .bind(row.credits)
            .bind(unix_micros(row.created_at))
            .bind(row.description.as_str())
            .bind(user_id.as_str())
            .bind(today)
            .bind(today)
            .bind(user_id.as_str())
            .bind(row.credits)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 { Ok(None) } else { Ok(Some(result.last_insert_rowid())) }
    }

    async fn append_settlement(&self, row: &NewTransaction) -> Result<SettlementReceipt> {
        let mut db = self.pool.begin().await?;

        // Writing first takes the database write lock before the scope is summed
        let settlement_id = insert_row(&mut *db, row, TransactionType::Settlement).await?;
        let (reserved, refunded): (i64, i64) = sqlx::query_as(HELD_FOR_SCOPE)
            .bind(row.scope.user_id.to_string())
            .bind(row.scope.collection_run_id.to_string())
            .bind(row.scope.arena.as_str())
            .bind(row.scope.platform.as_str())
            .fetch_one(&mut *db)
            .await?;

        // Only credits the scope still holds come back; a swept reservation holds none
        let mut receipt = SettlementReceipt { settlement_id, refund_id: None, refunded: 0 };
        let surplus = reserved - refunded - row.credits;
        if surplus > 0 {
            receipt.refund_id = Some(insert_row(&mut *db, &row.surplus_refund(surplus), TransactionType::Refund).await?);
            receipt.refunded = surplus;
        }

        db.commit().await?;
        Ok(receipt)
    }

    async fn append(&self, row: &NewTransaction, kind: TransactionType) -> Result<i64> {
        insert_row(&self.pool, row, kind).await
    }

    async fn append_refund_if_open(&self, row: &NewTransaction) -> Result<Option<i64>> {
        let user_id = row.scope.user_id.to_string();
        let collection_run_id = row.scope.collection_run_id.to_string();

        let result = sqlx::query(INSERT_REFUND_IF_OPEN)
            .bind(user_id.as_str())
            .bind(collection_run_id.as_str())
            .bind(row.scope.arena.as_str())
            .bind(row.scope.platform.as_str())
            .bind(row.scope.tier.as_str())
            .bind(row.credits)
            .bind(unix_micros(row.created_at))
            .bind(row.description.as_str())
            .bind(user_id.as_str())
            .bind(collection_run_id.as_str())
            .bind(row.scope.arena.as_str())
            .bind(row.scope.platform.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 { Ok(None) } else { Ok(Some(result.last_insert_rowid())) }
    }

    async fn balance(&self, user_id: Uuid, today: Date) -> Result<CreditBalance> {
        let user_id = user_id.to_string();
        let today = today.to_julian_day();

        let allocated: i64 =
            sqlx::query_scalar(ALLOCATED).bind(user_id.as_str()).bind(today).bind(today).fetch_one(&self.pool).await?;
        let sql = balance_totals();
        let (reserved, settled, refunded): (i64, i64, i64) =
            sqlx::query_as(&sql).bind(user_id.as_str()).fetch_one(&self.pool).await?;

        Ok(CreditBalance::from_totals(allocated, reserved, settled, refunded))
    }

    async fn history(&self, user_id: Uuid, limit: u32, cursor: Option<HistoryCursor>) -> Result<Vec<CreditTransaction>> {
        let user_id = user_id.to_string();
        let limit = i64::from(limit);

        let rows = match cursor {
            None => sqlx::query(HISTORY_FIRST_PAGE).bind(user_id).bind(limit).fetch_all(&self.pool).await?,
            Some(cursor) => {
                sqlx::query(HISTORY_AFTER_CURSOR)
                    .bind(user_id)
                    .bind(cursor.created_at_micros)
                    .bind(cursor.created_at_micros)
                    .bind(cursor.id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        decode_all(&rows)
    }

    async fn scope_transactions(&self, scope: &CreditScope) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query(SCOPE_TRANSACTIONS)
            .bind(scope.user_id.to_string())
            .bind(scope.collection_run_id.to_string())
            .bind(scope.arena.as_str())
            .bind(scope.platform.as_str())
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }

    async fn orphaned_reservations(&self, created_before: OffsetDateTime) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query(ORPHANED_RESERVATIONS).bind(unix_micros(created_before)).fetch_all(&self.pool).await?;
        decode_all(&rows)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn scope(user_id: Uuid) -> CreditScope {
        CreditScope::new(user_id, Uuid::new_v4(), "youtube", "youtube", Tier::Medium)
    }

    async fn seeded(credits: i64) -> (SqliteTransactionLog, Uuid) {
        let log = SqliteTransactionLog::in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        let allocation = CreditAllocation { user_id, credits_amount: credits, valid_from: date!(2020-01-01), valid_until: None };
        log.insert_allocation(&allocation).await.unwrap();
        (log, user_id)
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let log = SqliteTransactionLog::in_memory().await.unwrap();
        log.init_schema().await.unwrap();
        log.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_conditional_reservation() {
        let (log, user_id) = seeded(100).await;
        let scope = scope(user_id);
        let today = date!(2026-10-14);

        assert!(log.append_reservation_if_covered(&NewTransaction::new(&scope, 60, "r1"), today).await.unwrap().is_some());
        assert!(log.append_reservation_if_covered(&NewTransaction::new(&scope, 41, "r2"), today).await.unwrap().is_none());
        assert!(log.append_reservation_if_covered(&NewTransaction::new(&scope, 40, "r3"), today).await.unwrap().is_some());

        assert_eq!(log.balance(user_id, today).await.unwrap(), CreditBalance::from_totals(100, 100, 0, 0));
    }

    #[tokio::test]
    async fn test_allocation_window_respected() {
        let log = SqliteTransactionLog::in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        let grants = [
            CreditAllocation { user_id, credits_amount: 100, valid_from: date!(2026-01-01), valid_until: Some(date!(2026-06-30)) },
            CreditAllocation { user_id, credits_amount: 10, valid_from: date!(2026-06-01), valid_until: None },
            CreditAllocation { user_id, credits_amount: 1, valid_from: date!(2027-01-01), valid_until: None },
        ];
        for grant in &grants {
            log.insert_allocation(grant).await.unwrap();
        }

        assert_eq!(log.balance(user_id, date!(2025-12-31)).await.unwrap().total_allocated, 0);
        assert_eq!(log.balance(user_id, date!(2026-06-15)).await.unwrap().total_allocated, 110);
        assert_eq!(log.balance(user_id, date!(2026-06-30)).await.unwrap().total_allocated, 110);
        assert_eq!(log.balance(user_id, date!(2026-07-01)).await.unwrap().total_allocated, 10);
        assert_eq!(log.balance(user_id, date!(2027-01-01)).await.unwrap().total_allocated, 11);
    }

    #[tokio::test]
    async fn test_settlement_refunds_surplus_atomically() {
        let (log, user_id) = seeded(500).await;
        let scope = scope(user_id);
        let today = date!(2026-10-14);

        log.append_reservation_if_covered(&NewTransaction::new(&scope, 100, "r"), today).await.unwrap();
        let receipt = log.append_settlement(&NewTransaction::new(&scope, 70, "s")).await.unwrap();

        assert_eq!(receipt.refunded, 30);
        let rows = log.scope_transactions(&scope).await.unwrap();
        let kinds: Vec<TransactionType> = rows.iter().map(|row| row.transaction_type).collect();
        assert_eq!(kinds, vec![TransactionType::Reservation, TransactionType::Settlement, TransactionType::Refund]);
        assert_eq!(rows[2].id, receipt.refund_id.unwrap());
        assert_eq!(rows[2].credits_consumed, 30);
    }

    #[tokio::test]
    async fn test_conditional_refund_skips_closed_scope() {
        let (log, user_id) = seeded(500).await;
        let scope = scope(user_id);
        let today = date!(2026-10-14);

        log.append_reservation_if_covered(&NewTransaction::new(&scope, 100, "r"), today).await.unwrap();
        assert!(log.append_refund_if_open(&NewTransaction::new(&scope, 100, "sweep")).await.unwrap().is_some());
        assert!(log.append_refund_if_open(&NewTransaction::new(&scope, 100, "sweep again")).await.unwrap().is_none());

        let settled = CreditScope::new(user_id, Uuid::new_v4(), "youtube", "youtube", Tier::Medium);
        log.append_reservation_if_covered(&NewTransaction::new(&settled, 40, "r"), today).await.unwrap();
        log.append_settlement(&NewTransaction::new(&settled, 40, "s")).await.unwrap();
        assert!(log.append_refund_if_open(&NewTransaction::new(&settled, 40, "sweep")).await.unwrap().is_none());

        assert_eq!(log.balance(user_id, today).await.unwrap().available, 460);
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_row() {
        let (log, user_id) = seeded(10).await;
        let scope = scope(user_id);
        let row = NewTransaction::new(&scope, 7, "manual refund");

        let id = log.append(&row, TransactionType::Refund).await.unwrap();
        let stored = log.history(user_id, 10, None).await.unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].collection_run_id, scope.collection_run_id);
        assert_eq!(stored[0].tier, Tier::Medium);
        assert_eq!(stored[0].description, "manual refund");
        assert_eq!(unix_micros(stored[0].created_at), unix_micros(row.created_at));
    }

    #[tokio::test]
    async fn test_closed_pool_reports_storage_error() {
        let (log, user_id) = seeded(10).await;
        log.close().await;

        assert!(matches!(log.balance(user_id, date!(2026-10-14)).await, Err(crate::LedgerError::Storage(_))));
    }
}
