//! HTTP surface for the propledger synchronization engine.
//!
//! Every endpoint returns the uniform `{ success, message?, data? }`
//! envelope. Sync endpoints never fail a request merely because the
//! consistency check is slow; the health handler degrades instead.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;

pub use error::{ApiResult, ApiSyncError};
pub use models::ApiResponse;
pub use router::{sync_router, SyncApiState};
