//! Database layer for the propledger synchronization platform.
//!
//! Owns connection pooling, migrations for both stores, and the model
//! types with their raw-SQL operations. The operational store is read-only
//! from this crate's perspective; all engine state lives in the ledger
//! store.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use pool::{connect, connect_with};
