//! Database models for both stores.
//!
//! Operational-store models (`payment`, `property`, `app_user`) are
//! read-only to the engine; ledger-store models own the engine's state.

pub mod app_user;
pub mod company_account;
pub mod ledger_transaction;
pub mod maintenance_job;
pub mod payment;
pub mod property;
pub mod property_account;
pub mod sync_failure;

pub use app_user::OperationalUser;
pub use company_account::CompanyAccount;
pub use ledger_transaction::{
    AccountKind, LedgerTransaction, NewLedgerTransaction, TxnStatus, TxnType,
};
pub use maintenance_job::{
    EnqueueJob, JobStatus, MaintenanceJob, DEFAULT_LEASE_SECS, DEFAULT_MAX_ATTEMPTS,
    LEASE_REQUEUE_DELAY_SECS,
};
pub use payment::{Payment, PaymentStatus, PaymentType};
pub use property::Property;
pub use property_account::{LedgerType, PropertyAccount, PropertyMetadata};
pub use sync_failure::{
    backoff_delay_secs, EntityKind, FailureDetails, FailureStatus, SyncFailure,
    DEFAULT_BASE_BACKOFF_SECS, MAX_BACKOFF_SECS,
};
