//! # gov_ledger
//!
//! Per-user credit accounting for paid collection calls.
//!
//! The append-only transaction log is the only source of truth: balances are
//! recomputed from it on every read and rows are never updated or deleted.

pub mod error;
pub mod estimate;
pub mod ledger;
pub mod log;
pub mod sqlite;
pub mod types;

pub use error::LedgerError;
pub use error::Result;
pub use estimate::ArenaPlan;
pub use estimate::CostEstimator;
pub use estimate::CreditEstimate;
pub use ledger::CreditLedger;
pub use log::TransactionLog;
pub use sqlite::SqliteTransactionLog;
pub use types::CreditAllocation;
pub use types::CreditBalance;
pub use types::CreditScope;
pub use types::CreditState;
pub use types::CreditTransaction;
pub use types::HistoryCursor;
pub use types::HistoryPage;
pub use types::NewTransaction;
pub use types::SettlementReceipt;
pub use types::Tier;
pub use types::TransactionType;
