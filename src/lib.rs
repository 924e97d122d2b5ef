//! taskbank - a peer-to-peer help-task broker with a point ledger.
//!
//! Members stake points to publish help tasks, apply to help each other,
//! and settle the stake to the helper on completion. The crate is split
//! into:
//!
//! - `ledger`: SQLite-backed store; every balance-touching operation is a
//!   single transaction guarded by conditional updates
//! - `lifecycle`: the task state machine and escrow orchestration
//! - `moderation`: keyword plus semantic risk screening of task content
//! - `matching`: weighted task recommendations for a helper
//! - `reputation`: ratings, trust scores
//! - `api`: the axum HTTP surface

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod moderation;
pub mod reputation;

pub use config::Config;
pub use error::{LedgerError, LedgerResult};
pub use ledger::LedgerStore;
pub use lifecycle::TaskLifecycleEngine;
pub use matching::MatchingEngine;
pub use moderation::RiskClassifier;
