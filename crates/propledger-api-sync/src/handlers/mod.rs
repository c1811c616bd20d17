//! HTTP handlers for the sync API.

pub mod failures;
pub mod jobs;
pub mod schedules;
pub mod sync;
