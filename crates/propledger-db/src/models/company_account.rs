//! Company ledger account model.
//!
//! One non-archived ledger per company, holding agency commission income.
//! Same filter-gated append discipline as property ledgers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ledger_transaction::NewLedgerTransaction;

/// A company-level ledger account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CompanyAccount {
    pub id: Uuid,
    pub company_id: Uuid,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_payouts: Decimal,
    pub running_balance: Decimal,
    pub is_archived: bool,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompanyAccount {
    /// Whether the stored aggregates satisfy the balance invariant.
    #[must_use]
    pub fn balances(&self) -> bool {
        self.running_balance == self.total_income - self.total_expenses - self.total_payouts
    }

    /// Ensure a non-archived ledger exists for the company.
    pub async fn ensure(pool: &sqlx::PgPool, company_id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO company_accounts (company_id)
            VALUES ($1)
            ON CONFLICT (company_id) WHERE NOT is_archived
            DO NOTHING
            ",
        )
        .bind(company_id)
        .execute(pool)
        .await?;

        sqlx::query_as(
            r"
            SELECT * FROM company_accounts
            WHERE company_id = $1 AND NOT is_archived
            ",
        )
        .bind(company_id)
        .fetch_one(pool)
        .await
    }

    /// Find the active ledger for a company.
    pub async fn find_active(
        pool: &sqlx::PgPool,
        company_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM company_accounts
            WHERE company_id = $1 AND NOT is_archived
            ",
        )
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    /// Find a ledger by its own id.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM company_accounts WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Append a transaction gated on the payment-id/idempotency-key
    /// uniqueness, bumping aggregates in the same atomic statement.
    /// Returns whether the transaction was appended.
    pub async fn append_transaction(
        pool: &sqlx::PgPool,
        account_id: Uuid,
        txn: &NewLedgerTransaction,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            WITH ins AS (
                INSERT INTO ledger_transactions (
                    account_id, account_kind, txn_type, amount, txn_date,
                    source_payment_id, idempotency_key, description
                )
                VALUES ($1, 'company', $2, $3, $4, $5, $6, $7)
                ON CONFLICT DO NOTHING
                RETURNING txn_type, amount
            )
            UPDATE company_accounts a
            SET total_income = a.total_income
                    + COALESCE((SELECT amount FROM ins WHERE txn_type = 'income'), 0),
                total_expenses = a.total_expenses
                    + COALESCE((SELECT amount FROM ins WHERE txn_type = 'expense'), 0),
                total_payouts = a.total_payouts
                    + COALESCE((SELECT amount FROM ins WHERE txn_type = 'owner_payout'), 0),
                running_balance = a.running_balance
                    + COALESCE((SELECT amount FROM ins WHERE txn_type = 'income'), 0)
                    - COALESCE((SELECT amount FROM ins WHERE txn_type = 'expense'), 0)
                    - COALESCE((SELECT amount FROM ins WHERE txn_type = 'owner_payout'), 0),
                last_updated = NOW(),
                updated_at = NOW()
            WHERE a.id = $1 AND EXISTS (SELECT 1 FROM ins)
            ",
        )
        .bind(account_id)
        .bind(txn.txn_type.to_string())
        .bind(txn.amount)
        .bind(txn.txn_date)
        .bind(txn.source_payment_id)
        .bind(&txn.idempotency_key)
        .bind(&txn.description)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recompute aggregates from the non-archived transaction set.
    pub async fn recompute_totals(pool: &sqlx::PgPool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE company_accounts a
            SET total_income = s.income,
                total_expenses = s.expenses,
                total_payouts = s.payouts,
                running_balance = s.income - s.expenses - s.payouts,
                last_updated = NOW(),
                updated_at = NOW()
            FROM (
                SELECT
                    COALESCE(SUM(amount) FILTER (WHERE txn_type = 'income'), 0) AS income,
                    COALESCE(SUM(amount) FILTER (WHERE txn_type = 'expense'), 0) AS expenses,
                    COALESCE(SUM(amount) FILTER (WHERE txn_type = 'owner_payout'), 0) AS payouts
                FROM ledger_transactions
                WHERE account_id = $1 AND NOT is_archived
            ) s
            WHERE a.id = $1
            RETURNING a.*
            ",
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Count of active company ledgers.
    pub async fn count_active(pool: &sqlx::PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM company_accounts WHERE NOT is_archived
            ",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_invariant_check() {
        let account = CompanyAccount {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            total_income: dec!(250),
            total_expenses: dec!(0),
            total_payouts: dec!(0),
            running_balance: dec!(250),
            is_archived: false,
            last_updated: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(account.balances());
    }
}
