//! Ledger transaction model.
//!
//! Transactions are append-only: financial fields are never mutated or
//! removed once persisted. Corrections are new offsetting rows or soft
//! archival; the only mutable field after append is payout status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which ledger table a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Property,
    Company,
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKind::Property => write!(f, "property"),
            AccountKind::Company => write!(f, "company"),
        }
    }
}

/// Transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TxnType {
    Income,
    Expense,
    OwnerPayout,
}

impl std::fmt::Display for TxnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxnType::Income => write!(f, "income"),
            TxnType::Expense => write!(f, "expense"),
            TxnType::OwnerPayout => write!(f, "owner_payout"),
        }
    }
}

/// Transaction settlement status. Only payouts ever move out of `Cleared`
/// territory; the field exists so payout clearing can be tracked without
/// touching financial fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    Pending,
    Cleared,
}

/// A persisted ledger transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub account_kind: AccountKind,
    pub txn_type: TxnType,
    pub amount: Decimal,
    pub txn_date: DateTime<Utc>,
    pub source_payment_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub description: String,
    pub status: TxnStatus,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A prospective transaction to append.
#[derive(Debug, Clone)]
pub struct NewLedgerTransaction {
    pub txn_type: TxnType,
    pub amount: Decimal,
    pub txn_date: DateTime<Utc>,
    pub source_payment_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub description: String,
}

impl LedgerTransaction {
    /// Non-archived transactions of an account, ordered by transaction date.
    pub async fn list_for_account(
        pool: &sqlx::PgPool,
        account_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM ledger_transactions
            WHERE account_id = $1 AND NOT is_archived
            ORDER BY txn_date ASC, created_at ASC
            ",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    /// How many non-archived transactions in an account reference a payment.
    pub async fn count_for_payment(
        pool: &sqlx::PgPool,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM ledger_transactions
            WHERE account_id = $1 AND source_payment_id = $2 AND NOT is_archived
            ",
        )
        .bind(account_id)
        .bind(payment_id)
        .fetch_one(pool)
        .await
    }

    /// Accounts holding non-archived references to a payment, with counts.
    ///
    /// Drives the poster's post-hoc verification: zero rows means the
    /// posting is missing, a count above one means duplicates.
    pub async fn accounts_for_payment(
        pool: &sqlx::PgPool,
        payment_id: Uuid,
    ) -> Result<Vec<(Uuid, AccountKind, i64)>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT account_id, account_kind, COUNT(*)
            FROM ledger_transactions
            WHERE source_payment_id = $1 AND NOT is_archived
            GROUP BY account_id, account_kind
            ",
        )
        .bind(payment_id)
        .fetch_all(pool)
        .await
    }

    /// Payment ids referenced more than once (non-archived) within an account.
    pub async fn duplicate_payment_ids(
        pool: &sqlx::PgPool,
        account_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r"
            SELECT source_payment_id
            FROM ledger_transactions
            WHERE account_id = $1 AND source_payment_id IS NOT NULL AND NOT is_archived
            GROUP BY source_payment_id
            HAVING COUNT(*) > 1
            ",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Accounts touched since a cutoff that contain duplicate payment
    /// references. Feeds the consistency checker's duplicate scan.
    pub async fn accounts_with_duplicates(
        pool: &sqlx::PgPool,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, AccountKind)>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT DISTINCT account_id, account_kind
            FROM ledger_transactions
            WHERE source_payment_id IS NOT NULL AND NOT is_archived
                AND updated_at >= $1
            GROUP BY account_id, account_kind, source_payment_id
            HAVING COUNT(*) > 1
            ",
        )
        .bind(updated_since)
        .fetch_all(pool)
        .await
    }

    /// Non-archived transactions referencing a payment within an account,
    /// earliest first (transaction date, tie-broken by insertion order).
    pub async fn list_for_payment(
        pool: &sqlx::PgPool,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM ledger_transactions
            WHERE account_id = $1 AND source_payment_id = $2 AND NOT is_archived
            ORDER BY txn_date ASC, created_at ASC, id ASC
            ",
        )
        .bind(account_id)
        .bind(payment_id)
        .fetch_all(pool)
        .await
    }

    /// Soft-archive a set of transactions by id. Returns rows archived.
    pub async fn archive_by_ids(pool: &sqlx::PgPool, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r"
            UPDATE ledger_transactions
            SET is_archived = TRUE, updated_at = NOW()
            WHERE id = ANY($1) AND NOT is_archived
            ",
        )
        .bind(ids)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark an owner payout as cleared. The single permitted post-append
    /// mutation.
    pub async fn mark_payout_cleared(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE ledger_transactions
            SET status = 'cleared', updated_at = NOW()
            WHERE id = $1 AND txn_type = 'owner_payout' AND NOT is_archived
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Total non-archived transactions across all ledgers.
    pub async fn count_live(pool: &sqlx::PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM ledger_transactions WHERE NOT is_archived
            ",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_type_display() {
        assert_eq!(TxnType::Income.to_string(), "income");
        assert_eq!(TxnType::Expense.to_string(), "expense");
        assert_eq!(TxnType::OwnerPayout.to_string(), "owner_payout");
    }

    #[test]
    fn test_account_kind_display() {
        assert_eq!(AccountKind::Property.to_string(), "property");
        assert_eq!(AccountKind::Company.to_string(), "company");
    }
}
