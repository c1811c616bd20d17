//! Ledger poster.
//!
//! Converts detected payment events into durable ledger postings and keeps
//! denormalized property/user fields in the ledgers in sync. Every append
//! is a single conditional statement gated on the ledger's uniqueness
//! invariants, so re-delivery and concurrent writers converge on exactly
//! one non-archived transaction per payment per ledger.

use std::sync::Arc;

use propledger_db::models::{
    AccountKind, CompanyAccount, EntityKind, LedgerTransaction, LedgerType, NewLedgerTransaction,
    OperationalUser, Payment, PaymentType, Property, PropertyAccount, PropertyMetadata,
    SyncFailure, TxnType,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dedup::Deduplicator;
use crate::detector::{ChangeAction, ChangeEvent};
use crate::error::{SyncError, SyncResult};
use crate::resilience::{CircuitBreaker, RetryExecutor};

/// What a payment sync attempt appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingOutcome {
    /// An owner-income transaction was appended to the property ledger.
    pub property_appended: bool,
    /// A commission transaction was appended to the company ledger.
    pub company_appended: bool,
}

/// Idempotent business logic between detected changes and ledger state.
pub struct LedgerPoster {
    ops: PgPool,
    ledger: PgPool,
    retry: RetryExecutor,
    breaker: Arc<CircuitBreaker>,
    dedup: Deduplicator,
    failure_base_backoff_secs: i64,
    failure_max_attempts: i32,
}

impl LedgerPoster {
    /// Create a poster over both stores, sharing the engine's breaker.
    #[must_use]
    pub fn new(
        ops: PgPool,
        ledger: PgPool,
        retry: RetryExecutor,
        breaker: Arc<CircuitBreaker>,
        failure_base_backoff_secs: i64,
        failure_max_attempts: i32,
    ) -> Self {
        Self {
            ops,
            ledger: ledger.clone(),
            retry,
            breaker,
            dedup: Deduplicator::new(ledger),
            failure_base_backoff_secs,
            failure_max_attempts,
        }
    }

    /// Event-handling boundary: any failure is classified, recorded in the
    /// failure ledger, and swallowed — one bad event must not halt the
    /// detection loop. A success clears any pre-existing failure record.
    pub async fn handle_event(&self, event: ChangeEvent) {
        let kind = event.kind();
        let entity_id = event.entity_id();

        let result = match event {
            ChangeEvent::Payment { action, id } => match action {
                ChangeAction::Inserted | ChangeAction::Updated => {
                    self.sync_payment(id).await.map(|_| ())
                }
                // Ledger history is never unwound for a deleted payment.
                ChangeAction::Deleted => {
                    debug!(payment_id = %id, "Payment deleted; ledger history retained");
                    Ok(())
                }
            },
            ChangeEvent::Property { action, id } => match action {
                ChangeAction::Inserted | ChangeAction::Updated => self.sync_property(id).await,
                ChangeAction::Deleted => self.remove_entity(EntityKind::Property, id).await,
            },
            ChangeEvent::User { action, id } => match action {
                ChangeAction::Inserted | ChangeAction::Updated => self.sync_user(id).await,
                ChangeAction::Deleted => self.remove_entity(EntityKind::User, id).await,
            },
        };

        match result {
            Ok(()) => self.clear_failure(kind, entity_id).await,
            Err(e) => {
                warn!(kind = %kind, entity_id = %entity_id, error = %e, "Sync attempt failed");
                self.record_failure(kind, entity_id, &e).await;
            }
        }
    }

    /// Re-run the entity-kind-specific sync operation used at detection
    /// time. Failure reprocessing, the backlog drain, and the manual
    /// retry endpoint all come through here.
    pub async fn resync(&self, kind: EntityKind, entity_id: Uuid) -> SyncResult<()> {
        match kind {
            EntityKind::Payment => self.sync_payment(entity_id).await.map(|_| ()),
            EntityKind::Property => self.sync_property(entity_id).await,
            EntityKind::User => self.sync_user(entity_id).await,
        }
    }

    /// Synchronize one payment end-to-end: commission posting, owner
    /// income posting, then the post-hoc verification.
    pub async fn sync_payment(&self, payment_id: Uuid) -> SyncResult<PostingOutcome> {
        let payment = Payment::find_by_id(&self.ops, payment_id)
            .await?
            .ok_or(SyncError::EntityNotFound {
                kind: "payment",
                id: payment_id,
            })?;

        if !payment.is_ledgerable() {
            debug!(payment_id = %payment_id, status = %payment.status, "Payment not ledgerable; skipping");
            return Ok(PostingOutcome::default());
        }

        let outcome = self.post_payment(&payment).await?;
        self.verify_payment_postings(&payment).await?;
        Ok(outcome)
    }

    async fn post_payment(&self, payment: &Payment) -> SyncResult<PostingOutcome> {
        let company_appended = self.post_payment_commission(payment).await?;
        let property_appended = self.post_owner_income_for(payment).await?;

        if company_appended || property_appended {
            info!(
                payment_id = %payment.id,
                company_appended,
                property_appended,
                "Posted payment to ledgers"
            );
        }

        Ok(PostingOutcome {
            property_appended,
            company_appended,
        })
    }

    /// Post the agency commission to the company ledger, if the payment
    /// carries a non-zero agency share. Returns whether a transaction was
    /// appended (false means it already existed — a no-op, not an error).
    pub async fn post_payment_commission(&self, payment: &Payment) -> SyncResult<bool> {
        if !payment.is_ledgerable() || payment.agency_share <= Decimal::ZERO {
            return Ok(false);
        }

        let account = self
            .retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let company_id = payment.company_id;
                async move {
                    CompanyAccount::ensure(&pool, company_id)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await?;

        let txn = NewLedgerTransaction {
            txn_type: TxnType::Income,
            amount: payment.agency_share,
            txn_date: payment.posting_date(),
            source_payment_id: Some(payment.id),
            idempotency_key: None,
            description: format!("Agency commission ({})", payment.payment_type),
        };

        self.retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let txn = txn.clone();
                let account_id = account.id;
                async move {
                    CompanyAccount::append_transaction(&pool, account_id, &txn)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await
    }

    /// Post the owner's net income share to the owning property ledger.
    /// Resolves the payment first; used directly by the reconcile API.
    pub async fn post_owner_income(&self, payment_id: Uuid) -> SyncResult<bool> {
        let payment = Payment::find_by_id(&self.ops, payment_id)
            .await?
            .ok_or(SyncError::EntityNotFound {
                kind: "payment",
                id: payment_id,
            })?;
        self.post_owner_income_for(&payment).await
    }

    async fn post_owner_income_for(&self, payment: &Payment) -> SyncResult<bool> {
        if !payment.is_ledgerable() || payment.owner_share <= Decimal::ZERO {
            return Ok(false);
        }

        let metadata = self.property_metadata(payment.property_id).await?;
        let ledger_type = ledger_type_for(payment.payment_type)?;

        let account = self
            .retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let metadata = metadata.clone();
                let property_id = payment.property_id;
                async move {
                    PropertyAccount::ensure(&pool, property_id, ledger_type, &metadata)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await?;

        let txn = NewLedgerTransaction {
            txn_type: TxnType::Income,
            amount: payment.owner_share,
            txn_date: payment.posting_date(),
            source_payment_id: Some(payment.id),
            idempotency_key: None,
            description: format!("Owner income ({})", payment.payment_type),
        };

        self.retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let txn = txn.clone();
                let account_id = account.id;
                async move {
                    PropertyAccount::append_transaction(&pool, account_id, &txn)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await
    }

    async fn sync_property(&self, property_id: Uuid) -> SyncResult<()> {
        match Property::find_by_id(&self.ops, property_id).await? {
            Some(property) => self.sync_property_metadata(&property).await,
            // Row vanished between event and read: same treatment as a
            // delete event.
            None => self.remove_entity(EntityKind::Property, property_id).await,
        }
    }

    /// Upsert denormalized property fields into its ledgers, creating the
    /// rental ledger on first sight of the property.
    pub async fn sync_property_metadata(&self, property: &Property) -> SyncResult<()> {
        let metadata = self.metadata_for(property).await?;

        self.retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let metadata = metadata.clone();
                let property_id = property.id;
                async move {
                    PropertyAccount::ensure(&pool, property_id, LedgerType::Rental, &metadata)
                        .await
                        .map_err(SyncError::from)?;
                    PropertyAccount::sync_metadata(&pool, property_id, &metadata)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await?;

        Ok(())
    }

    async fn sync_user(&self, user_id: Uuid) -> SyncResult<()> {
        match OperationalUser::find_by_id(&self.ops, user_id).await? {
            Some(user) => self.sync_user_metadata(&user).await,
            None => self.remove_entity(EntityKind::User, user_id).await,
        }
    }

    /// Refresh the denormalized owner name on every ledger referencing the
    /// user.
    pub async fn sync_user_metadata(&self, user: &OperationalUser) -> SyncResult<()> {
        self.retry
            .execute_with_circuit_breaker(&self.breaker, || {
                let pool = self.ledger.clone();
                let user_id = user.id;
                let name = user.display_name.clone();
                async move {
                    PropertyAccount::set_owner_name(&pool, user_id, &name)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await?;

        Ok(())
    }

    /// Handle deletion of a source entity: denormalized references are
    /// removed, ledger history never is. A deleted property's ledgers are
    /// archived, not dropped.
    pub async fn remove_entity(&self, kind: EntityKind, id: Uuid) -> SyncResult<()> {
        match kind {
            EntityKind::Property => {
                let archived = self
                    .retry
                    .execute_with_circuit_breaker(&self.breaker, || {
                        let pool = self.ledger.clone();
                        async move {
                            PropertyAccount::archive_for_property(&pool, id)
                                .await
                                .map_err(SyncError::from)
                        }
                    })
                    .await?;
                if archived > 0 {
                    info!(property_id = %id, archived, "Archived ledgers of deleted property");
                }
            }
            EntityKind::User => {
                let cleared = self
                    .retry
                    .execute_with_circuit_breaker(&self.breaker, || {
                        let pool = self.ledger.clone();
                        async move {
                            PropertyAccount::clear_owner(&pool, id)
                                .await
                                .map_err(SyncError::from)
                        }
                    })
                    .await?;
                if cleared > 0 {
                    info!(user_id = %id, cleared, "Cleared owner references of deleted user");
                }
            }
            EntityKind::Payment => {
                debug!(payment_id = %id, "Payment deletion leaves ledger history intact");
            }
        }
        Ok(())
    }

    /// Best-effort post-hoc check after every attempted posting: re-query
    /// both ledgers for the payment id. Absent where expected → fail with
    /// a retriable error so the failure ledger re-enqueues it; present
    /// more than once → invoke the deduplicator. Closes race windows
    /// between concurrent push/poll/full-sync writers.
    pub async fn verify_payment_postings(&self, payment: &Payment) -> SyncResult<()> {
        let postings = LedgerTransaction::accounts_for_payment(&self.ledger, payment.id).await?;

        for (account_id, kind, count) in &postings {
            if *count > 1 {
                warn!(
                    payment_id = %payment.id,
                    account_id = %account_id,
                    count,
                    "Duplicate postings detected; deduplicating"
                );
                self.dedup
                    .dedupe_payment(*account_id, *kind, payment.id)
                    .await?;
            }
        }

        let has_property = postings
            .iter()
            .any(|(_, kind, _)| *kind == AccountKind::Property);
        let has_company = postings
            .iter()
            .any(|(_, kind, _)| *kind == AccountKind::Company);

        let missing_property = payment.owner_share > Decimal::ZERO && !has_property;
        let missing_company = payment.agency_share > Decimal::ZERO && !has_company;

        if missing_property || missing_company {
            return Err(SyncError::PostingIncomplete {
                payment_id: payment.id,
            });
        }

        Ok(())
    }

    async fn property_metadata(&self, property_id: Uuid) -> SyncResult<PropertyMetadata> {
        match Property::find_by_id(&self.ops, property_id).await? {
            Some(property) => self.metadata_for(&property).await,
            None => Err(SyncError::EntityNotFound {
                kind: "property",
                id: property_id,
            }),
        }
    }

    async fn metadata_for(&self, property: &Property) -> SyncResult<PropertyMetadata> {
        let owner_name = match property.owner_id {
            Some(owner_id) => OperationalUser::find_by_id(&self.ops, owner_id)
                .await?
                .map(|u| u.display_name),
            None => None,
        };

        Ok(PropertyMetadata {
            name: property.name.clone(),
            address: property.address.clone(),
            owner_id: property.owner_id,
            owner_name,
        })
    }

    /// Record a failed attempt in the failure ledger.
    pub async fn record_failure(&self, kind: EntityKind, entity_id: Uuid, error: &SyncError) {
        let details = error.failure_details();
        if let Err(e) = SyncFailure::record(
            &self.ledger,
            kind,
            entity_id,
            &details,
            self.failure_base_backoff_secs,
            self.failure_max_attempts,
        )
        .await
        {
            // Last-resort path: the failure ledger itself is down. Log and
            // move on; the reconciliation pass re-derives missing postings.
            warn!(kind = %kind, entity_id = %entity_id, error = %e, "Failed to record sync failure");
        }
    }

    async fn clear_failure(&self, kind: EntityKind, entity_id: Uuid) {
        match SyncFailure::resolve(&self.ledger, kind, entity_id).await {
            Ok(true) => {
                debug!(kind = %kind, entity_id = %entity_id, "Resolved pending sync failure");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(kind = %kind, entity_id = %entity_id, error = %e, "Failed to resolve sync failure");
            }
        }
    }
}

/// The ledger a payment type posts owner income into.
fn ledger_type_for(payment_type: PaymentType) -> SyncResult<LedgerType> {
    match payment_type {
        PaymentType::Rental => Ok(LedgerType::Rental),
        PaymentType::Sale => Ok(LedgerType::Sale),
        other => Err(SyncError::Validation(format!(
            "Payment type {other} does not post to a ledger"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_type_mapping() {
        assert_eq!(
            ledger_type_for(PaymentType::Rental).unwrap(),
            LedgerType::Rental
        );
        assert_eq!(ledger_type_for(PaymentType::Sale).unwrap(), LedgerType::Sale);
        assert!(ledger_type_for(PaymentType::Deposit).is_err());
        assert!(ledger_type_for(PaymentType::Fee).is_err());
    }

    #[test]
    fn test_posting_outcome_default_is_noop() {
        let outcome = PostingOutcome::default();
        assert!(!outcome.property_appended);
        assert!(!outcome.company_appended);
    }
}
