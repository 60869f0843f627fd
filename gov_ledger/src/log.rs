use async_trait::async_trait;
use time::Date;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Result;
use crate::types::CreditAllocation;
use crate::types::CreditBalance;
use crate::types::CreditScope;
use crate::types::CreditTransaction;
use crate::types::HistoryCursor;
use crate::types::NewTransaction;
use crate::types::SettlementReceipt;
use crate::types::TransactionType;

/// Durable append-only store of allocations and credit transactions
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn insert_allocation(&self, allocation: &CreditAllocation) -> Result<i64>;

    /// Append a reservation only if the user's balance on `today` covers it,
    /// checking and inserting as one atomic step. `None` when it does not.
    async fn append_reservation_if_covered(&self, row: &NewTransaction, today: Date) -> Result<Option<i64>>;

    /// Append a settlement together with a refund of whatever the scope's
    /// reservations exceed it by. Either both rows are written or neither.
    async fn append_settlement(&self, row: &NewTransaction) -> Result<SettlementReceipt>;

    async fn append(&self, row: &NewTransaction, kind: TransactionType) -> Result<i64>;

    /// Append a refund only while the scope has neither a settlement nor a refund.
    /// `None` when it was closed in the meantime.
    async fn append_refund_if_open(&self, row: &NewTransaction) -> Result<Option<i64>>;

    /// Aggregate balance, recomputed from every row
    async fn balance(&self, user_id: Uuid, today: Date) -> Result<CreditBalance>;

    /// Newest-first page strictly after `cursor`
    async fn history(&self, user_id: Uuid, limit: u32, cursor: Option<HistoryCursor>) -> Result<Vec<CreditTransaction>>;

    /// Every row for one scope, oldest first
    async fn scope_transactions(&self, scope: &CreditScope) -> Result<Vec<CreditTransaction>>;

    /// Reservations created before `created_before` whose scope has neither a settlement nor a refund
    async fn orphaned_reservations(&self, created_before: OffsetDateTime) -> Result<Vec<CreditTransaction>>;
}
