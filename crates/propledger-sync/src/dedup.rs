//! Duplicate-posting resolution.
//!
//! Given a ledger known to contain duplicate transactions for the same
//! source payment, deterministically keep the earliest and archive the
//! rest, then recompute the ledger's aggregates from the surviving
//! non-archived set. Archival, not deletion, preserves auditability.

use propledger_db::models::{AccountKind, CompanyAccount, LedgerTransaction, PropertyAccount};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::SyncResult;

/// Pick which of a payment's transactions to archive: everything except
/// the earliest by transaction date, tie-broken by insertion order, then
/// by id for full determinism.
#[must_use]
pub fn duplicates_to_archive(txns: &[LedgerTransaction]) -> Vec<Uuid> {
    if txns.len() < 2 {
        return Vec::new();
    }

    let mut ordered: Vec<&LedgerTransaction> = txns.iter().collect();
    ordered.sort_by(|a, b| {
        a.txn_date
            .cmp(&b.txn_date)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    ordered.into_iter().skip(1).map(|t| t.id).collect()
}

/// Archives duplicate transactions and restores ledger aggregates.
pub struct Deduplicator {
    ledger: PgPool,
}

impl Deduplicator {
    /// Create a deduplicator over the ledger store.
    #[must_use]
    pub fn new(ledger: PgPool) -> Self {
        Self { ledger }
    }

    /// Dedupe one payment's transactions within one account, recomputing
    /// totals when anything was archived. Returns rows archived.
    pub async fn dedupe_payment(
        &self,
        account_id: Uuid,
        kind: AccountKind,
        payment_id: Uuid,
    ) -> SyncResult<u64> {
        let txns = LedgerTransaction::list_for_payment(&self.ledger, account_id, payment_id).await?;
        let to_archive = duplicates_to_archive(&txns);
        if to_archive.is_empty() {
            return Ok(0);
        }

        let archived = LedgerTransaction::archive_by_ids(&self.ledger, &to_archive).await?;
        self.recompute(account_id, kind).await?;

        info!(
            account_id = %account_id,
            payment_id = %payment_id,
            archived,
            "Archived duplicate ledger transactions"
        );
        Ok(archived)
    }

    /// Dedupe every duplicated payment within an account. Totals are
    /// recomputed once at the end.
    pub async fn dedupe_account(&self, account_id: Uuid, kind: AccountKind) -> SyncResult<u64> {
        let payment_ids =
            LedgerTransaction::duplicate_payment_ids(&self.ledger, account_id).await?;
        if payment_ids.is_empty() {
            return Ok(0);
        }

        let mut archived = 0;
        for payment_id in payment_ids {
            let txns =
                LedgerTransaction::list_for_payment(&self.ledger, account_id, payment_id).await?;
            let to_archive = duplicates_to_archive(&txns);
            archived += LedgerTransaction::archive_by_ids(&self.ledger, &to_archive).await?;
        }

        if archived > 0 {
            self.recompute(account_id, kind).await?;
            info!(account_id = %account_id, archived, "Deduped ledger account");
        }
        Ok(archived)
    }

    async fn recompute(&self, account_id: Uuid, kind: AccountKind) -> SyncResult<()> {
        match kind {
            AccountKind::Property => {
                PropertyAccount::recompute_totals(&self.ledger, account_id).await?;
            }
            AccountKind::Company => {
                CompanyAccount::recompute_totals(&self.ledger, account_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use propledger_db::models::{TxnStatus, TxnType};
    use rust_decimal_macros::dec;

    fn txn(
        offset_secs: i64,
        created_offset_secs: i64,
        payment_id: Uuid,
        account_id: Uuid,
    ) -> LedgerTransaction {
        let base = Utc::now();
        LedgerTransaction {
            id: Uuid::new_v4(),
            account_id,
            account_kind: AccountKind::Property,
            txn_type: TxnType::Income,
            amount: dec!(900),
            txn_date: base + Duration::seconds(offset_secs),
            source_payment_id: Some(payment_id),
            idempotency_key: None,
            description: String::new(),
            status: TxnStatus::Cleared,
            is_archived: false,
            created_at: base + Duration::seconds(created_offset_secs),
            updated_at: base,
        }
    }

    #[test]
    fn test_earliest_by_date_survives() {
        let payment_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let t1 = txn(0, 30, payment_id, account_id);
        let t2 = txn(10, 20, payment_id, account_id);
        let t3 = txn(20, 10, payment_id, account_id);

        let archived = duplicates_to_archive(&[t3.clone(), t1.clone(), t2.clone()]);
        assert_eq!(archived.len(), 2);
        assert!(archived.contains(&t2.id));
        assert!(archived.contains(&t3.id));
        assert!(!archived.contains(&t1.id));
    }

    #[test]
    fn test_date_tie_broken_by_insertion_order() {
        let payment_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let mut t1 = txn(0, 5, payment_id, account_id);
        let mut t2 = txn(0, 10, payment_id, account_id);
        let shared = Utc::now();
        t1.txn_date = shared;
        t2.txn_date = shared;

        let archived = duplicates_to_archive(&[t2.clone(), t1.clone()]);
        assert_eq!(archived, vec![t2.id]);
    }

    #[test]
    fn test_single_transaction_untouched() {
        let payment_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let t1 = txn(0, 0, payment_id, account_id);
        assert!(duplicates_to_archive(&[t1]).is_empty());
        assert!(duplicates_to_archive(&[]).is_empty());
    }
}
