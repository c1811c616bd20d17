//! Cross-store consistency checking and best-effort repair.
//!
//! Answers "are the two stores consistent?" within a bounded lookback
//! window. Findings are reported rather than silently fixed; callers
//! decide whether to auto-repair. A quick mode races the read-only audit
//! against a timeout and reports degraded instead of blocking the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use propledger_db::models::{
    LedgerTransaction, OperationalUser, Payment, Property, PropertyAccount,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::dedup::Deduplicator;
use crate::error::SyncResult;
use crate::poster::LedgerPoster;

/// Kinds of cross-store inconsistency the checker can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// A ledger whose owning property no longer exists.
    OrphanedLedger,
    /// An active property with no non-archived ledger.
    MissingLedger,
    /// A ledger owner reference to a user that no longer exists.
    DanglingOwner,
    /// A completed payment absent from a ledger it should appear in.
    MissingPosting,
    /// A payment referenced more than once within one ledger.
    DuplicatePosting,
}

impl std::fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InconsistencyKind::OrphanedLedger => write!(f, "orphaned_ledger"),
            InconsistencyKind::MissingLedger => write!(f, "missing_ledger"),
            InconsistencyKind::DanglingOwner => write!(f, "dangling_owner"),
            InconsistencyKind::MissingPosting => write!(f, "missing_posting"),
            InconsistencyKind::DuplicatePosting => write!(f, "duplicate_posting"),
        }
    }
}

/// One aggregated finding.
#[derive(Debug, Clone, Serialize)]
pub struct Inconsistency {
    #[serde(rename = "type")]
    pub kind: InconsistencyKind,
    pub description: String,
    pub count: u64,
}

/// Result of a consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub inconsistencies: Vec<Inconsistency>,
    /// Repairs applied during this run (0 unless repair was requested).
    pub repaired: u64,
    pub checked_at: DateTime<Utc>,
}

/// Quick-mode result: either the report, or a timeout marker.
#[derive(Debug, Clone)]
pub enum QuickCheckOutcome {
    Completed(ConsistencyReport),
    TimedOut,
}

/// Cross-store auditor.
pub struct ConsistencyChecker {
    ops: PgPool,
    ledger: PgPool,
    poster: Arc<LedgerPoster>,
    dedup: Deduplicator,
    lookback_days: i64,
    quick_timeout: Duration,
    /// Cap on payments audited per run; cost stays proportional to recent
    /// activity.
    payment_audit_limit: i64,
}

impl ConsistencyChecker {
    /// Create a checker over both stores.
    #[must_use]
    pub fn new(
        ops: PgPool,
        ledger: PgPool,
        poster: Arc<LedgerPoster>,
        lookback_days: i64,
        quick_timeout: Duration,
    ) -> Self {
        Self {
            ops,
            ledger: ledger.clone(),
            poster,
            dedup: Deduplicator::new(ledger),
            lookback_days,
            quick_timeout,
            payment_audit_limit: 10_000,
        }
    }

    fn lookback_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::days(self.lookback_days)
    }

    /// Deep check: the full five-step audit. With `repair` set, known-safe
    /// fixes are applied (archival of orphans, ledger creation, owner
    /// unset, re-posting, dedup) and counted in the report.
    pub async fn check(&self, repair: bool) -> SyncResult<ConsistencyReport> {
        let mut inconsistencies = Vec::new();
        let mut repaired: u64 = 0;

        // 1. Ledgers whose owning property is gone are archived, never
        //    deleted.
        let mut orphaned = 0u64;
        for (_, property_id) in PropertyAccount::list_active_refs(&self.ledger).await? {
            if !Property::exists(&self.ops, property_id).await? {
                orphaned += 1;
                if repair {
                    repaired +=
                        PropertyAccount::archive_for_property(&self.ledger, property_id).await?;
                }
            }
        }
        if orphaned > 0 {
            inconsistencies.push(Inconsistency {
                kind: InconsistencyKind::OrphanedLedger,
                description: "Ledgers whose owning property no longer exists".to_string(),
                count: orphaned,
            });
        }

        // 2. Every active property must have a non-archived ledger.
        let mut missing_ledgers = 0u64;
        for property in Property::list_active(&self.ops).await? {
            if !PropertyAccount::exists_active_for(&self.ledger, property.id).await? {
                missing_ledgers += 1;
                if repair {
                    self.poster.sync_property_metadata(&property).await?;
                    repaired += 1;
                }
            }
        }
        if missing_ledgers > 0 {
            inconsistencies.push(Inconsistency {
                kind: InconsistencyKind::MissingLedger,
                description: "Active properties without a ledger".to_string(),
                count: missing_ledgers,
            });
        }

        // 3. Owner references must point at live users; dangling ones are
        //    unset, never fabricated.
        let mut dangling = 0u64;
        for owner_id in PropertyAccount::list_owner_refs(&self.ledger).await? {
            if !OperationalUser::exists(&self.ops, owner_id).await? {
                dangling += 1;
                if repair {
                    repaired += PropertyAccount::clear_owner(&self.ledger, owner_id).await?;
                }
            }
        }
        if dangling > 0 {
            inconsistencies.push(Inconsistency {
                kind: InconsistencyKind::DanglingOwner,
                description: "Ledger owner references to deleted users".to_string(),
                count: dangling,
            });
        }

        // 4. Completed payments in the window must be posted.
        let cutoff = self.lookback_cutoff();
        let mut missing_postings = 0u64;
        let payments =
            Payment::list_completed_since(&self.ops, cutoff, self.payment_audit_limit).await?;
        for payment in &payments {
            if self.payment_has_gap(payment).await? {
                missing_postings += 1;
                if repair {
                    match self.poster.sync_payment(payment.id).await {
                        Ok(_) => repaired += 1,
                        Err(e) => {
                            warn!(payment_id = %payment.id, error = %e, "Repair re-post failed");
                        }
                    }
                }
            }
        }
        if missing_postings > 0 {
            inconsistencies.push(Inconsistency {
                kind: InconsistencyKind::MissingPosting,
                description: "Completed payments missing from their ledgers".to_string(),
                count: missing_postings,
            });
        }

        // 5. Duplicate scan over recently-updated ledgers.
        let mut duplicates = 0u64;
        for (account_id, kind) in
            LedgerTransaction::accounts_with_duplicates(&self.ledger, cutoff).await?
        {
            duplicates += 1;
            if repair {
                repaired += self.dedup.dedupe_account(account_id, kind).await?;
            }
        }
        if duplicates > 0 {
            inconsistencies.push(Inconsistency {
                kind: InconsistencyKind::DuplicatePosting,
                description: "Ledgers containing duplicate payment postings".to_string(),
                count: duplicates,
            });
        }

        let report = ConsistencyReport {
            is_consistent: inconsistencies.is_empty(),
            inconsistencies,
            repaired,
            checked_at: Utc::now(),
        };

        info!(
            is_consistent = report.is_consistent,
            findings = report.inconsistencies.len(),
            repaired = report.repaired,
            "Consistency check completed"
        );
        Ok(report)
    }

    /// Quick mode for health-check callers: the read-only audit raced
    /// against the timeout budget. On elapse the underlying check is
    /// dropped (no partial writes exist in read-only mode) and the caller
    /// reports degraded — a health endpoint must never hang behind a slow
    /// audit.
    pub async fn check_quick(&self) -> SyncResult<QuickCheckOutcome> {
        match tokio::time::timeout(self.quick_timeout, self.check(false)).await {
            Ok(report) => Ok(QuickCheckOutcome::Completed(report?)),
            Err(_) => {
                warn!(
                    timeout_secs = self.quick_timeout.as_secs(),
                    "Quick consistency check timed out; reporting degraded"
                );
                Ok(QuickCheckOutcome::TimedOut)
            }
        }
    }

    async fn payment_has_gap(&self, payment: &Payment) -> SyncResult<bool> {
        let postings = LedgerTransaction::accounts_for_payment(&self.ledger, payment.id).await?;

        let has_property = postings
            .iter()
            .any(|(_, kind, _)| *kind == propledger_db::models::AccountKind::Property);
        let has_company = postings
            .iter()
            .any(|(_, kind, _)| *kind == propledger_db::models::AccountKind::Company);

        Ok((payment.owner_share > Decimal::ZERO && !has_property)
            || (payment.agency_share > Decimal::ZERO && !has_company))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(
            InconsistencyKind::OrphanedLedger.to_string(),
            "orphaned_ledger"
        );
        assert_eq!(
            InconsistencyKind::DuplicatePosting.to_string(),
            "duplicate_posting"
        );
    }

    #[test]
    fn test_report_serializes_kind_as_type() {
        let report = ConsistencyReport {
            is_consistent: false,
            inconsistencies: vec![Inconsistency {
                kind: InconsistencyKind::MissingPosting,
                description: "gap".to_string(),
                count: 3,
            }],
            repaired: 0,
            checked_at: Utc::now(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["inconsistencies"][0]["type"], "missing_posting");
        assert_eq!(json["inconsistencies"][0]["count"], 3);
        assert_eq!(json["is_consistent"], false);
    }
}
