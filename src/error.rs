//! Error taxonomy for ledger and lifecycle operations.
//!
//! Every rejected operation maps to a specific variant so callers can render
//! an exact reason. Lifecycle errors are local and synchronous; no operation
//! partially applies its effect. Classifier degradation is *not* an error —
//! it is surfaced as a flag on the assessment (see `moderation`).

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("task rejected by risk screening: {reason}")]
    RiskRejected { reason: String },

    #[error("task held for manual review: {reason}")]
    HeldForReview { reason: String },

    #[error("cannot apply to your own task")]
    SelfApplication,

    #[error("already applied to this task")]
    DuplicateApplication,

    #[error("task is not open")]
    TaskNotOpen,

    #[error("task was already accepted by another applicant")]
    AlreadyAccepted,

    #[error("actor is not authorized for this operation")]
    NotAuthorized,

    #[error("task is not in progress")]
    NotInProgress,

    #[error("task is not completed")]
    NotCompleted,

    #[error("a review in this direction already exists for this task")]
    DuplicateReview,

    #[error("rating must be between 1.0 and 5.0 in 0.5 steps")]
    InvalidRating,

    #[error("stake must be between {min} and {max} points")]
    InvalidStake { min: i64, max: i64 },

    #[error("email is already registered")]
    EmailTaken,

    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("no application from this applicant for this task")]
    ApplicationNotFound,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
