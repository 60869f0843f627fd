use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::Date;
use time::OffsetDateTime;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::error::Result;
use crate::error::on_write;
use crate::estimate::ArenaPlan;
use crate::estimate::CostEstimator;
use crate::estimate::CreditEstimate;
use crate::estimate::estimate_plan;
use crate::log::TransactionLog;
use crate::types::CreditAllocation;
use crate::types::CreditBalance;
use crate::types::CreditScope;
use crate::types::CreditState;
use crate::types::HistoryCursor;
use crate::types::HistoryPage;
use crate::types::NewTransaction;
use crate::types::SettlementReceipt;
use crate::types::Tier;
use crate::types::TransactionType;

/// Largest page [`CreditLedger::get_transaction_history`] returns
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Credit budget for paid collection calls
///
/// Callers bracket every paid call with [`reserve`](Self::reserve) and exactly
/// one of [`settle`](Self::settle) or [`refund`](Self::refund).
pub struct CreditLedger {
    log: Arc<dyn TransactionLog>,
    estimators: HashMap<String, Arc<dyn CostEstimator>>,
}

impl CreditLedger {
    pub fn new(log: Arc<dyn TransactionLog>) -> Self {
        Self { log, estimators: HashMap::new() }
    }

    /// Register the cost model of one arena
    pub fn with_estimator(mut self, arena: impl Into<String>, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimators.insert(arena.into(), estimator);
        self
    }

    /// Expected cost of running a query design. Writes nothing and never fails.
    pub fn estimate(
        &self,
        query_design_id: Uuid,
        default_tier: Tier,
        arenas: &BTreeMap<String, ArenaPlan>,
        date_from: Option<Date>,
        date_to: Option<Date>,
    ) -> CreditEstimate {
        estimate_plan(&self.estimators, query_design_id, default_tier, arenas, date_from, date_to)
    }

    pub async fn allocate(&self, allocation: &CreditAllocation) -> Result<i64> {
        check_amount(allocation.credits_amount)?;
        let id = on_write(self.log.insert_allocation(allocation).await)?;
        info!(user_id = %allocation.user_id, credits = allocation.credits_amount, valid_from = %allocation.valid_from, "Allocated credits");
        Ok(id)
    }

    /// Hold `credits_amount` for a paid call, failing without writing if the balance does not cover it
    pub async fn reserve(&self, scope: &CreditScope, credits_amount: i64) -> Result<i64> {
        check_amount(credits_amount)?;
        let description = format!("Reserved {credits_amount} credits for {}/{}", scope.arena, scope.platform);
        let row = NewTransaction::new(scope, credits_amount, description);
        let today = row.created_at.date();

        match on_write(self.log.append_reservation_if_covered(&row, today).await)? {
            Some(id) => {
                info!(
                    user_id = %scope.user_id,
                    run = %scope.collection_run_id,
                    arena = %scope.arena,
                    credits = credits_amount,
                    id,
                    "Reserved credits"
                );
                Ok(id)
            }
            None => {
                let available = self.log.balance(scope.user_id, today).await?.available;
                warn!(user_id = %scope.user_id, arena = %scope.arena, required = credits_amount, available, "Insufficient credits");
                Err(LedgerError::InsufficientCredit { required: credits_amount, available, user_id: scope.user_id })
            }
        }
    }

    /// Record the true cost of a call, refunding whatever the scope still holds beyond it
    pub async fn settle(&self, scope: &CreditScope, actual_credits: i64) -> Result<SettlementReceipt> {
        check_amount(actual_credits)?;
        let description = format!("Settled {actual_credits} credits for {}/{}", scope.arena, scope.platform);
        let row = NewTransaction::new(scope, actual_credits, description);

        let receipt = on_write(self.log.append_settlement(&row).await)?;
        info!(
            user_id = %scope.user_id,
            run = %scope.collection_run_id,
            arena = %scope.arena,
            credits = actual_credits,
            refunded = receipt.refunded,
            "Settled credits"
        );
        Ok(receipt)
    }

    pub async fn refund(&self, scope: &CreditScope, credits_amount: i64) -> Result<i64> {
        check_amount(credits_amount)?;
        let description = format!("Refunded {credits_amount} credits for {}/{}", scope.arena, scope.platform);
        let row = NewTransaction::new(scope, credits_amount, description);

        let id = on_write(self.log.append(&row, TransactionType::Refund).await)?;
        info!(
            user_id = %scope.user_id,
            run = %scope.collection_run_id,
            arena = %scope.arena,
            credits = credits_amount,
            id,
            "Refunded credits"
        );
        Ok(id)
    }

    pub async fn get_balance(&self, user_id: Uuid) -> Result<CreditBalance> {
        self.log.balance(user_id, OffsetDateTime::now_utc().date()).await
    }

    /// Newest-first page of a user's transactions, `limit` clamped to `1..=200`
    pub async fn get_transaction_history(
        &self,
        user_id: Uuid,
        limit: u32,
        cursor: Option<&HistoryCursor>,
    ) -> Result<HistoryPage> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let transactions = self.log.history(user_id, limit, cursor.copied()).await?;
        let next_cursor =
            if transactions.len() == limit as usize { transactions.last().map(HistoryCursor::after) } else { None };
        Ok(HistoryPage { transactions, next_cursor })
    }

    pub async fn lifecycle_state(&self, scope: &CreditScope) -> Result<CreditState> {
        let rows = self.log.scope_transactions(scope).await?;
        let has = |kind: TransactionType| rows.iter().any(|row| row.transaction_type == kind);

        let state = if has(TransactionType::Settlement) {
            CreditState::Settled
        } else if has(TransactionType::Refund) {
            CreditState::Refunded
        } else if has(TransactionType::Reservation) {
            CreditState::Reserved
        } else {
            CreditState::Planned
        };
        Ok(state)
    }

    /// Refund reservations older than `grace` that were never settled or refunded.
    ///
    /// Covers task runners that died between reserve and settle. Returns the
    /// ids of the refund rows written, one per scope. A scope settled or
    /// refunded between listing and refunding is left alone.
    pub async fn sweep_orphaned_reservations(&self, grace: Duration) -> Result<Vec<i64>> {
        let cutoff = time::Duration::try_from(grace).ok().and_then(|grace| OffsetDateTime::now_utc().checked_sub(grace));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };

        let mut held: HashMap<CreditScope, i64> = HashMap::new();
        for row in self.log.orphaned_reservations(cutoff).await? {
            let scope = CreditScope::new(row.user_id, row.collection_run_id, row.arena, row.platform, row.tier);
            *held.entry(scope).or_default() += row.credits_consumed;
        }

        let mut refunds = Vec::with_capacity(held.len());
        for (scope, credits) in held {
            let row = NewTransaction::new(&scope, credits, format!("Released {credits} credits held by an abandoned reservation"));
            match on_write(self.log.append_refund_if_open(&row).await)? {
                Some(id) => {
                    warn!(
                        user_id = %scope.user_id,
                        run = %scope.collection_run_id,
                        arena = %scope.arena,
                        credits,
                        id,
                        "Refunded orphaned reservation"
                    );
                    refunds.push(id);
                }
                None => debug!(run = %scope.collection_run_id, arena = %scope.arena, "Reservation closed before the sweep reached it"),
            }
        }
        refunds.sort_unstable();
        Ok(refunds)
    }
}

fn check_amount(credits: i64) -> Result<()> {
    if credits < 0 { Err(LedgerError::InvalidAmount(credits)) } else { Ok(()) }
}
