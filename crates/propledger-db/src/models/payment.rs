//! Payment read model (operational store).
//!
//! The sync engine never writes back into the operational store; payments
//! are read to derive ledger postings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment lifecycle status in the operational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting settlement.
    Pending,
    /// Settled; eligible for ledger posting.
    Completed,
    /// Settlement failed.
    Failed,
    /// Previously completed, then reversed.
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(format!("Unknown payment status: {s}")),
        }
    }
}

/// Payment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    /// Recurring rent collection.
    Rental,
    /// Property sale settlement.
    Sale,
    /// Security deposit; never posted to ledgers.
    Deposit,
    /// Ancillary fee; never posted to ledgers.
    Fee,
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentType::Rental => write!(f, "rental"),
            PaymentType::Sale => write!(f, "sale"),
            PaymentType::Deposit => write!(f, "deposit"),
            PaymentType::Fee => write!(f, "fee"),
        }
    }
}

impl std::str::FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rental" => Ok(PaymentType::Rental),
            "sale" => Ok(PaymentType::Sale),
            "deposit" => Ok(PaymentType::Deposit),
            "fee" => Ok(PaymentType::Fee),
            _ => Err(format!("Unknown payment type: {s}")),
        }
    }
}

/// A payment as read from the operational store.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub property_id: Uuid,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    /// Gross amount collected.
    pub amount: Decimal,
    /// Agency commission share of the gross amount.
    pub agency_share: Decimal,
    /// Owner net income share of the gross amount.
    pub owner_share: Decimal,
    pub description: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Whether this payment produces ledger postings at all.
    #[must_use]
    pub fn is_ledgerable(&self) -> bool {
        self.status == PaymentStatus::Completed
            && matches!(self.payment_type, PaymentType::Rental | PaymentType::Sale)
    }

    /// The posting date: settlement time, falling back to creation time.
    #[must_use]
    pub fn posting_date(&self) -> DateTime<Utc> {
        self.paid_at.unwrap_or(self.created_at)
    }

    /// Find a payment by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM payments WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Payments whose `updated_at` falls within a polling window.
    pub async fn list_updated_between(
        pool: &sqlx::PgPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM payments
            WHERE updated_at > $1 AND updated_at <= $2
            ORDER BY updated_at ASC
            ",
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }

    /// Completed rental/sale payments settled since a cutoff, oldest first.
    ///
    /// Drives full sync, the reconciliation pass, and the consistency
    /// checker's posting audit.
    pub async fn list_completed_since(
        pool: &sqlx::PgPool,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM payments
            WHERE status = 'completed'
                AND payment_type IN ('rental', 'sale')
                AND COALESCE(paid_at, created_at) >= $1
            ORDER BY COALESCE(paid_at, created_at) ASC
            LIMIT $2
            ",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(status: PaymentStatus, payment_type: PaymentType) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            payment_type,
            status,
            amount: dec!(1000),
            agency_share: dec!(100),
            owner_share: dec!(900),
            description: None,
            paid_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ledgerable_requires_completed_rental_or_sale() {
        assert!(payment(PaymentStatus::Completed, PaymentType::Rental).is_ledgerable());
        assert!(payment(PaymentStatus::Completed, PaymentType::Sale).is_ledgerable());
        assert!(!payment(PaymentStatus::Pending, PaymentType::Rental).is_ledgerable());
        assert!(!payment(PaymentStatus::Completed, PaymentType::Deposit).is_ledgerable());
        assert!(!payment(PaymentStatus::Refunded, PaymentType::Sale).is_ledgerable());
    }

    #[test]
    fn test_posting_date_prefers_paid_at() {
        let mut p = payment(PaymentStatus::Completed, PaymentType::Rental);
        assert_eq!(p.posting_date(), p.created_at);
        let paid = Utc::now();
        p.paid_at = Some(paid);
        assert_eq!(p.posting_date(), paid);
    }

    #[test]
    fn test_payment_status_round_trip() {
        for s in ["pending", "completed", "failed", "refunded"] {
            let parsed: PaymentStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("settled".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_payment_type_round_trip() {
        for t in ["rental", "sale", "deposit", "fee"] {
            let parsed: PaymentType = t.parse().unwrap();
            assert_eq!(parsed.to_string(), t);
        }
        assert!("lease".parse::<PaymentType>().is_err());
    }
}
