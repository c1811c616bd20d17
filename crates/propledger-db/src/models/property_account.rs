//! Property ledger account model.
//!
//! One non-archived ledger per (property, ledger type). Mutation happens
//! exclusively through conditional, filter-gated statements so concurrent
//! writers cannot double-append: the second writer's filter matches zero
//! rows and the statement is a no-op.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ledger_transaction::NewLedgerTransaction;

/// Ledger type of a property account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerType {
    Rental,
    Sale,
}

impl std::fmt::Display for LedgerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerType::Rental => write!(f, "rental"),
            LedgerType::Sale => write!(f, "sale"),
        }
    }
}

impl std::str::FromStr for LedgerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rental" => Ok(LedgerType::Rental),
            "sale" => Ok(LedgerType::Sale),
            _ => Err(format!("Unknown ledger type: {s}")),
        }
    }
}

/// Denormalized property fields kept on the ledger document.
#[derive(Debug, Clone, Default)]
pub struct PropertyMetadata {
    pub name: String,
    pub address: Option<String>,
    pub owner_id: Option<Uuid>,
    pub owner_name: Option<String>,
}

/// A property-level ledger account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PropertyAccount {
    pub id: Uuid,
    pub property_id: Uuid,
    pub ledger_type: LedgerType,
    pub property_name: String,
    pub property_address: Option<String>,
    pub owner_id: Option<Uuid>,
    pub owner_name: Option<String>,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_payouts: Decimal,
    pub running_balance: Decimal,
    pub is_archived: bool,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropertyAccount {
    /// Whether the stored aggregates satisfy the balance invariant.
    #[must_use]
    pub fn balances(&self) -> bool {
        self.running_balance == self.total_income - self.total_expenses - self.total_payouts
    }

    /// Ensure a non-archived ledger exists for (property, type), creating it
    /// lazily on first posting. The partial unique index makes the create
    /// race-safe; the loser of the race reads the winner's row.
    pub async fn ensure(
        pool: &sqlx::PgPool,
        property_id: Uuid,
        ledger_type: LedgerType,
        metadata: &PropertyMetadata,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO property_accounts (
                property_id, ledger_type, property_name, property_address,
                owner_id, owner_name
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (property_id, ledger_type) WHERE NOT is_archived
            DO NOTHING
            ",
        )
        .bind(property_id)
        .bind(ledger_type)
        .bind(&metadata.name)
        .bind(&metadata.address)
        .bind(metadata.owner_id)
        .bind(&metadata.owner_name)
        .execute(pool)
        .await?;

        sqlx::query_as(
            r"
            SELECT * FROM property_accounts
            WHERE property_id = $1 AND ledger_type = $2 AND NOT is_archived
            ",
        )
        .bind(property_id)
        .bind(ledger_type)
        .fetch_one(pool)
        .await
    }

    /// Find the active ledger for (property, type).
    pub async fn find_active(
        pool: &sqlx::PgPool,
        property_id: Uuid,
        ledger_type: LedgerType,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM property_accounts
            WHERE property_id = $1 AND ledger_type = $2 AND NOT is_archived
            ",
        )
        .bind(property_id)
        .bind(ledger_type)
        .fetch_optional(pool)
        .await
    }

    /// Find a ledger by its own id.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM property_accounts WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Append a transaction if and only if no non-archived transaction for
    /// the same source payment (or idempotency key) already exists, and
    /// bump the aggregates in the same statement.
    ///
    /// The insert and the totals update form one atomic statement: when the
    /// partial unique index rejects the insert, the CTE is empty and the
    /// update's `EXISTS` filter matches nothing. Returns whether the
    /// transaction was appended.
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
                VALUES ($1, 'property', $2, $3, $4, $5, $6, $7)
                ON CONFLICT DO NOTHING
                RETURNING txn_type, amount
            )
            UPDATE property_accounts a
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

    /// Recompute aggregates deterministically from the non-archived
    /// transaction set. Used after dedup and by repair paths; the stored
    /// totals are never trusted over this.
    pub async fn recompute_totals(pool: &sqlx::PgPool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE property_accounts a
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

    /// Upsert denormalized property fields onto all active ledgers of the
    /// property. Returns the number of ledgers touched.
    pub async fn sync_metadata(
        pool: &sqlx::PgPool,
        property_id: Uuid,
        metadata: &PropertyMetadata,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE property_accounts
            SET property_name = $2,
                property_address = $3,
                owner_id = $4,
                owner_name = CASE
                    WHEN $4::uuid IS NULL THEN NULL
                    ELSE COALESCE($5, owner_name)
                END,
                updated_at = NOW()
            WHERE property_id = $1 AND NOT is_archived
            ",
        )
        .bind(property_id)
        .bind(&metadata.name)
        .bind(&metadata.address)
        .bind(metadata.owner_id)
        .bind(&metadata.owner_name)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Refresh the denormalized owner name wherever the owner is referenced.
    pub async fn set_owner_name(
        pool: &sqlx::PgPool,
        owner_id: Uuid,
        owner_name: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE property_accounts
            SET owner_name = $2, updated_at = NOW()
            WHERE owner_id = $1 AND NOT is_archived
            ",
        )
        .bind(owner_id)
        .bind(owner_name)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Unset owner references to a user that no longer exists. Never
    /// fabricates a replacement.
    pub async fn clear_owner(pool: &sqlx::PgPool, owner_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE property_accounts
            SET owner_id = NULL, owner_name = NULL, updated_at = NOW()
            WHERE owner_id = $1 AND NOT is_archived
            ",
        )
        .bind(owner_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Archive all active ledgers of a deleted property. History is kept.
    pub async fn archive_for_property(
        pool: &sqlx::PgPool,
        property_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE property_accounts
            SET is_archived = TRUE, updated_at = NOW()
            WHERE property_id = $1 AND NOT is_archived
            ",
        )
        .bind(property_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// (account id, property id) pairs of all active ledgers; the
    /// consistency checker verifies each property still exists.
    pub async fn list_active_refs(pool: &sqlx::PgPool) -> Result<Vec<(Uuid, Uuid)>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT id, property_id FROM property_accounts WHERE NOT is_archived
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Distinct owner ids referenced by active ledgers.
    pub async fn list_owner_refs(pool: &sqlx::PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r"
            SELECT DISTINCT owner_id FROM property_accounts
            WHERE owner_id IS NOT NULL AND NOT is_archived
            ",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Whether a property has any active ledger.
    pub async fn exists_active_for(
        pool: &sqlx::PgPool,
        property_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM property_accounts
                WHERE property_id = $1 AND NOT is_archived
            )
            ",
        )
        .bind(property_id)
        .fetch_one(pool)
        .await
    }

    /// Count of active property ledgers.
    pub async fn count_active(pool: &sqlx::PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM property_accounts WHERE NOT is_archived
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
    fn test_ledger_type_round_trip() {
        for t in ["rental", "sale"] {
            let parsed: LedgerType = t.parse().unwrap();
            assert_eq!(parsed.to_string(), t);
        }
        assert!("escrow".parse::<LedgerType>().is_err());
    }

    #[test]
    fn test_balance_invariant_check() {
        let mut account = PropertyAccount {
            id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            ledger_type: LedgerType::Rental,
            property_name: "Unit 4".to_string(),
            property_address: None,
            owner_id: None,
            owner_name: None,
            total_income: dec!(900),
            total_expenses: dec!(100),
            total_payouts: dec!(300),
            running_balance: dec!(500),
            is_archived: false,
            last_updated: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(account.balances());

        account.running_balance = dec!(501);
        assert!(!account.balances());
    }
}
