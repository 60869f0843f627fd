use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::Date;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::LedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Provider access tier a collection runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Medium,
    Premium,
}

impl Tier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Medium => "medium",
            Tier::Premium => "premium",
        }
    }

    /// Flat per-arena cost used when an arena supplies no estimator
    pub const fn default_cost(self) -> i64 {
        match self {
            Tier::Free => 0,
            Tier::Medium => 10,
            Tier::Premium => 50,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "medium" => Ok(Tier::Medium),
            "premium" => Ok(Tier::Premium),
            other => Err(ParseEnumError { kind: "tier", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Reservation,
    Settlement,
    Refund,
}

impl TransactionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransactionType::Reservation => "reservation",
            TransactionType::Settlement => "settlement",
            TransactionType::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(TransactionType::Reservation),
            "settlement" => Ok(TransactionType::Settlement),
            "refund" => Ok(TransactionType::Refund),
            other => Err(ParseEnumError { kind: "transaction type", value: other.to_string() }),
        }
    }
}

/// Credits granted to a user by an administrator
///
/// Counts towards the balance only on days within `valid_from..=valid_until`;
/// an open `valid_until` never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAllocation {
    pub user_id: Uuid,
    pub credits_amount: i64,
    pub valid_from: Date,
    pub valid_until: Option<Date>,
}

/// What a single paid call is charged to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreditScope {
    pub user_id: Uuid,
    pub collection_run_id: Uuid,
    pub arena: String,
    pub platform: String,
    pub tier: Tier,
}

impl CreditScope {
    pub fn new(user_id: Uuid, collection_run_id: Uuid, arena: impl Into<String>, platform: impl Into<String>, tier: Tier) -> Self {
        Self { user_id, collection_run_id, arena: arena.into(), platform: platform.into(), tier }
    }
}

/// A row to append to the transaction log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub scope: CreditScope,
    pub credits: i64,
    pub created_at: OffsetDateTime,
    pub description: String,
}

impl NewTransaction {
    pub fn new(scope: &CreditScope, credits: i64, description: impl Into<String>) -> Self {
        Self { scope: scope.clone(), credits, created_at: OffsetDateTime::now_utc(), description: description.into() }
    }

    /// Refund row returning the unused part of this settlement's reservations
    pub fn surplus_refund(&self, surplus: i64) -> Self {
        let description = format!("Auto-refund of {surplus} unused reserved credits for {}/{}", self.scope.arena, self.scope.platform);
        Self::new(&self.scope, surplus, description)
    }
}

/// An immutable row of the transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: Uuid,
    pub collection_run_id: Uuid,
    pub arena: String,
    pub platform: String,
    pub tier: Tier,
    pub credits_consumed: i64,
    pub transaction_type: TransactionType,
    pub created_at: OffsetDateTime,
    pub description: String,
}

/// Balance derived from the full transaction history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreditBalance {
    pub total_allocated: i64,
    pub reserved: i64,
    /// Settlement charges in excess of what their scope still held (reserved minus refunded)
    pub settled: i64,
    pub refunded: i64,
    pub available: i64,
}

impl CreditBalance {
    pub fn from_totals(total_allocated: i64, reserved: i64, settled: i64, refunded: i64) -> Self {
        Self { total_allocated, reserved, settled, refunded, available: total_allocated - reserved - settled + refunded }
    }
}

/// Where one (run, arena, platform) stands in its credit lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditState {
    /// Estimated at most; nothing written
    Planned,
    Reserved,
    /// Closed out by a settlement, possibly with an automatic refund
    Settled,
    /// Closed out by an explicit refund
    Refunded,
}

/// Outcome of a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub settlement_id: i64,
    pub refund_id: Option<i64>,
    pub refunded: i64,
}

/// Keyset position in a reverse-chronological history: `{created_at_micros}:{id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryCursor {
    pub created_at_micros: i64,
    pub id: i64,
}

impl HistoryCursor {
    /// Cursor pointing just past `transaction`
    pub fn after(transaction: &CreditTransaction) -> Self {
        Self { created_at_micros: unix_micros(transaction.created_at), id: transaction.id }
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.created_at_micros, self.id)
    }
}

impl FromStr for HistoryCursor {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (created_at, id) = s.split_once(':').ok_or_else(|| LedgerError::InvalidCursor(s.to_string()))?;
        let created_at_micros = created_at.parse().map_err(|_| LedgerError::InvalidCursor(s.to_string()))?;
        let id = id.parse().map_err(|_| LedgerError::InvalidCursor(s.to_string()))?;
        Ok(Self { created_at_micros, id })
    }
}

/// One page of transaction history, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub transactions: Vec<CreditTransaction>,
    #[serde(serialize_with = "serialize_cursor")]
    pub next_cursor: Option<HistoryCursor>,
}

fn serialize_cursor<S: serde::Serializer>(cursor: &Option<HistoryCursor>, serializer: S) -> Result<S::Ok, S::Error> {
    match cursor {
        Some(cursor) => serializer.collect_str(cursor),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn unix_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}
