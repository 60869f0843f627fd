use std::sync::Arc;

use gov_ledger::CreditAllocation;
use gov_ledger::CreditLedger;
use gov_ledger::CreditScope;
use gov_ledger::LedgerError;
use gov_ledger::SqliteTransactionLog;
use gov_ledger::Tier;
use time::macros::date;
use uuid::Uuid;

async fn file_ledger(dir: &tempfile::TempDir) -> CreditLedger {
    let log = SqliteTransactionLog::connect_file(&dir.path().join("ledger.db")).await.unwrap();
    CreditLedger::new(Arc::new(log))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_overspend() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(file_ledger(&dir).await);
    let user_id = Uuid::new_v4();
    ledger.allocate(&CreditAllocation { user_id, credits_amount: 100, valid_from: date!(2020-01-01), valid_until: None }).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            let scope = CreditScope::new(user_id, Uuid::new_v4(), "youtube", "youtube", Tier::Medium);
            ledger.reserve(&scope, 30).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(LedgerError::InsufficientCredit { required: 30, .. }) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(ledger.get_balance(user_id).await.unwrap().available, 10);
}

#[tokio::test]
async fn test_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let user_id = Uuid::new_v4();
    let scope = CreditScope::new(user_id, Uuid::new_v4(), "reddit", "reddit", Tier::Free);

    {
        let ledger = file_ledger(&dir).await;
        ledger.allocate(&CreditAllocation { user_id, credits_amount: 40, valid_from: date!(2020-01-01), valid_until: None }).await.unwrap();
        ledger.reserve(&scope, 15).await.unwrap();
    }

    let ledger = file_ledger(&dir).await;
    assert_eq!(ledger.get_balance(user_id).await.unwrap().available, 25);
    assert_eq!(ledger.get_transaction_history(user_id, 10, None).await.unwrap().transactions.len(), 1);
}
