//! HTTP API - the black-box surface presentation collaborators call.
//!
//! Handlers translate requests into lifecycle/matching/moderation calls and
//! map `LedgerError` variants to status codes. No business invariant lives
//! here; actor ids arrive as explicit request fields supplied by the
//! external auth collaborator.

mod routes;
mod types;

pub use routes::{serve, AppState};
