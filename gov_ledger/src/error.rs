use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the credit ledger
///
/// Budget and persistence failures are always surfaced; the ledger never
/// degrades silently.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The user's available balance does not cover the reservation. Nothing was written.
    #[error("Insufficient credits for user {user_id}: {required} required, {available} available")]
    InsufficientCredit { required: i64, available: i64, user_id: Uuid },

    /// A reserve/settle/refund write failed; the ledger state must be treated as unknown
    #[error("Credit transaction was not recorded: {0}")]
    CreditReservation(#[source] sqlx::Error),

    #[error("Transaction log query failed: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Credit amount must not be negative, got {0}")]
    InvalidAmount(i64),

    #[error("Invalid history cursor: {0}")]
    InvalidCursor(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Reclassify storage failures of a write path as reservation errors
pub(crate) fn on_write<T>(result: Result<T>) -> Result<T> {
    result.map_err(|err| match err {
        LedgerError::Storage(source) => LedgerError::CreditReservation(source),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_write_reclassifies_storage_errors() {
        let err = on_write::<()>(Err(LedgerError::Storage(sqlx::Error::PoolClosed))).unwrap_err();
        assert!(matches!(err, LedgerError::CreditReservation(sqlx::Error::PoolClosed)));

        let err = on_write::<()>(Err(LedgerError::InvalidAmount(-1))).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(-1)));
    }

    #[test]
    fn test_insufficient_credit_message() {
        let err = LedgerError::InsufficientCredit { required: 100, available: 40, user_id: Uuid::nil() };
        assert_eq!(err.to_string(), "Insufficient credits for user 00000000-0000-0000-0000-000000000000: 100 required, 40 available");
    }
}
