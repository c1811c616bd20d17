//! Ledger-store invariant tests against a live PostgreSQL.
//!
//! Ignored by default; run with a scratch database:
//!
//! ```text
//! LEDGER_TEST_DATABASE_URL=postgres://localhost/propledger_test \
//!     cargo test -p propledger-db -- --ignored
//! ```
//!
//! These exercise the invariants the engine's correctness rests on: the
//! filter-gated idempotent append, dedup convergence via archival plus
//! recompute, and the job queue's atomic claim and lease recovery.

use chrono::{Duration, Utc};
use propledger_db::models::{
    CompanyAccount, EnqueueJob, JobStatus, LedgerTransaction, LedgerType, MaintenanceJob,
    NewLedgerTransaction, PropertyAccount, PropertyMetadata, TxnType,
};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let url = std::env::var("LEDGER_TEST_DATABASE_URL")
        .expect("LEDGER_TEST_DATABASE_URL must point at a scratch database");
    let pool = propledger_db::connect(&url).await.expect("connect");
    propledger_db::migrations::migrate_ledger(&pool)
        .await
        .expect("migrate");
    pool
}

fn income(payment_id: Uuid, amount: rust_decimal::Decimal) -> NewLedgerTransaction {
    NewLedgerTransaction {
        txn_type: TxnType::Income,
        amount,
        txn_date: Utc::now(),
        source_payment_id: Some(payment_id),
        idempotency_key: None,
        description: "Owner income (rental)".to_string(),
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn posting_the_same_payment_n_times_appends_once() {
    let pool = test_pool().await;
    let payment_id = Uuid::new_v4();

    let account = PropertyAccount::ensure(
        &pool,
        Uuid::new_v4(),
        LedgerType::Rental,
        &PropertyMetadata::default(),
    )
    .await
    .unwrap();

    let mut appended = 0;
    for _ in 0..5 {
        if PropertyAccount::append_transaction(&pool, account.id, &income(payment_id, dec!(900)))
            .await
            .unwrap()
        {
            appended += 1;
        }
    }
    assert_eq!(appended, 1);

    let count = LedgerTransaction::count_for_payment(&pool, account.id, payment_id)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let account = PropertyAccount::find_by_id(&pool, account.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.total_income, dec!(900));
    assert_eq!(account.running_balance, dec!(900));
    assert!(account.balances());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn concurrent_appends_of_one_payment_converge_to_one_row() {
    let pool = test_pool().await;
    let payment_id = Uuid::new_v4();

    let account = CompanyAccount::ensure(&pool, Uuid::new_v4()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let txn = income(payment_id, dec!(100));
        let account_id = account.id;
        handles.push(tokio::spawn(async move {
            CompanyAccount::append_transaction(&pool, account_id, &txn).await
        }));
    }

    let mut appended = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            appended += 1;
        }
    }
    assert_eq!(appended, 1, "exactly one concurrent writer may append");

    let refreshed = CompanyAccount::recompute_totals(&pool, account.id)
        .await
        .unwrap();
    assert_eq!(refreshed.total_income, dec!(100));
    assert!(refreshed.balances());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn recompute_restores_balance_invariant_after_archival() {
    let pool = test_pool().await;
    let account = PropertyAccount::ensure(
        &pool,
        Uuid::new_v4(),
        LedgerType::Sale,
        &PropertyMetadata::default(),
    )
    .await
    .unwrap();

    for amount in [dec!(500), dec!(300)] {
        let appended = PropertyAccount::append_transaction(
            &pool,
            account.id,
            &income(Uuid::new_v4(), amount),
        )
        .await
        .unwrap();
        assert!(appended);
    }

    let txns = LedgerTransaction::list_for_account(&pool, account.id)
        .await
        .unwrap();
    assert_eq!(txns.len(), 2);

    // Archive one row out-of-band and prove recompute derives the totals
    // purely from the surviving set.
    LedgerTransaction::archive_by_ids(&pool, &[txns[0].id])
        .await
        .unwrap();

    let refreshed = PropertyAccount::recompute_totals(&pool, account.id)
        .await
        .unwrap();
    assert_eq!(refreshed.total_income, txns[1].amount);
    assert_eq!(
        refreshed.running_balance,
        refreshed.total_income - refreshed.total_expenses - refreshed.total_payouts
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn claim_is_mutually_exclusive_across_workers() {
    let pool = test_pool().await;
    let company_id = Uuid::new_v4();

    let job = MaintenanceJob::enqueue(
        &pool,
        &EnqueueJob {
            operation: format!("claim_test_{}", Uuid::new_v4()),
            company_id,
            requested_by: "test".to_string(),
            payload: serde_json::json!({}),
            max_attempts: None,
        },
    )
    .await
    .unwrap();

    let first = MaintenanceJob::claim_next(&pool, "worker-a", 120).await.unwrap();
    let second = MaintenanceJob::claim_next(&pool, "worker-b", 120).await.unwrap();

    let claimed: Vec<Uuid> = [&first, &second]
        .iter()
        .filter_map(|c| c.as_ref())
        .filter(|j| j.id == job.id)
        .map(|j| j.id)
        .collect();
    assert_eq!(claimed.len(), 1, "exactly one claim may succeed");

    let job = MaintenanceJob::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 1);
    assert!(job.lease_expires_at.is_some());

    MaintenanceJob::complete(&pool, job.id, serde_json::json!({"done": true}))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn expired_lease_is_requeued_and_claimable_again() {
    let pool = test_pool().await;

    let job = MaintenanceJob::enqueue(
        &pool,
        &EnqueueJob {
            operation: format!("lease_test_{}", Uuid::new_v4()),
            company_id: Uuid::new_v4(),
            requested_by: "test".to_string(),
            payload: serde_json::json!({}),
            max_attempts: None,
        },
    )
    .await
    .unwrap();

    // Claim with an already-expired lease (worker presumed crashed).
    let claimed = MaintenanceJob::claim_next(&pool, "worker-crash", -1)
        .await
        .unwrap()
        .expect("job should be claimable");
    assert_eq!(claimed.id, job.id);

    let released = MaintenanceJob::release_expired_leases(&pool).await.unwrap();
    assert!(released >= 1);

    let job = MaintenanceJob::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.worker_id.is_none());
    assert!(job.run_after > Utc::now() - Duration::seconds(1));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn enqueue_deduplicates_on_operation_and_company() {
    let pool = test_pool().await;
    let company_id = Uuid::new_v4();
    let operation = format!("dedup_test_{}", Uuid::new_v4());

    let request = EnqueueJob {
        operation,
        company_id,
        requested_by: "test".to_string(),
        payload: serde_json::json!({}),
        max_attempts: None,
    };

    let first = MaintenanceJob::enqueue(&pool, &request).await.unwrap();
    let second = MaintenanceJob::enqueue(&pool, &request).await.unwrap();
    assert_eq!(first.id, second.id);
}
