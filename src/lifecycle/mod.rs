//! Task lifecycle engine.
//!
//! Enforces the task state machine and the escrow flow on top of the ledger
//! store's atomic primitives:
//!
//! ```text
//! open -> in_progress -> completed   (publisher confirm, or expiry sweep)
//! open -> cancelled                  (publisher cancel)
//! ```
//!
//! Terminal states are final. Every operation takes an explicit actor id;
//! there is no ambient identity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::types::{Application, Review, Task, TaskDraft, TaskId, UserId};
use crate::ledger::LedgerStore;
use crate::moderation::{RiskAssessment, Recommendation, RiskClassifier};

/// Orchestrates lifecycle operations against the ledger store.
pub struct TaskLifecycleEngine {
    store: Arc<LedgerStore>,
    classifier: Arc<RiskClassifier>,
    /// How long an in-progress task may sit unconfirmed before the sweep
    /// settles it on the publisher's behalf.
    grace: Duration,
    stake_min: i64,
    stake_max: i64,
}

impl TaskLifecycleEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        classifier: Arc<RiskClassifier>,
        grace_days: i64,
        stake_min: i64,
        stake_max: i64,
    ) -> Self {
        Self {
            store,
            classifier,
            grace: Duration::days(grace_days),
            stake_min,
            stake_max,
        }
    }

    /// Publish a task: risk-screen the content, then atomically debit the
    /// stake and insert the task in `open`.
    ///
    /// The assessment is returned alongside the task so the caller can
    /// surface warn-allow notices and the degraded-review flag.
    pub async fn publish(
        &self,
        publisher: UserId,
        draft: TaskDraft,
    ) -> LedgerResult<(Task, RiskAssessment)> {
        if draft.stake < self.stake_min || draft.stake > self.stake_max {
            return Err(LedgerError::InvalidStake {
                min: self.stake_min,
                max: self.stake_max,
            });
        }

        let assessment = self
            .classifier
            .classify(&draft.description, &draft.category)
            .await;
        match assessment.recommendation {
            Recommendation::AutoReject => {
                tracing::info!(%publisher, reason = %assessment.reason, "task auto-rejected");
                return Err(LedgerError::RiskRejected {
                    reason: assessment.reason,
                });
            }
            Recommendation::ManualReview => {
                tracing::info!(%publisher, reason = %assessment.reason, "task held for review");
                return Err(LedgerError::HeldForReview {
                    reason: assessment.reason,
                });
            }
            Recommendation::AutoPass | Recommendation::WarnAllow => {}
        }

        let task = self
            .store
            .create_task_escrowed(publisher, &draft, Utc::now())?;
        tracing::info!(task = %task.id, %publisher, stake = task.stake, "task published");
        Ok((task, assessment))
    }

    /// Apply for an open task.
    pub fn apply(&self, task: TaskId, applicant: UserId) -> LedgerResult<Application> {
        let application = self.store.insert_application(task, applicant, Utc::now())?;
        tracing::debug!(%task, %applicant, "application recorded");
        Ok(application)
    }

    /// Accept one applicant. At most one concurrent accept succeeds; the
    /// losers observe `AlreadyAccepted`.
    pub fn accept(&self, task: TaskId, applicant: UserId, actor: UserId) -> LedgerResult<Task> {
        let task = self
            .store
            .accept_application(task, applicant, actor, Utc::now())?;
        tracing::info!(task = %task.id, helper = %applicant, "applicant accepted");
        Ok(task)
    }

    /// Helper signals completion. Idempotent; no balance change.
    pub fn notify_completion(&self, task: TaskId, helper: UserId) -> LedgerResult<()> {
        self.store.set_helper_notified(task, helper)
    }

    /// Publisher confirms completion: credits the stake to the helper and
    /// bumps both completion counters atomically.
    pub fn confirm_completion(&self, task: TaskId, actor: UserId) -> LedgerResult<Task> {
        let task = self.store.settle(task, Some(actor), Utc::now())?;
        tracing::info!(task = %task.id, "task settled by publisher confirmation");
        Ok(task)
    }

    /// Cancel an open task, refunding the stake.
    pub fn cancel(&self, task: TaskId, actor: UserId) -> LedgerResult<Task> {
        let task = self.store.cancel_task(task, actor)?;
        tracing::info!(task = %task.id, "task cancelled, stake refunded");
        Ok(task)
    }

    /// Settle every in-progress task accepted more than the grace period
    /// before `now`. Protects helpers from a non-responsive publisher.
    ///
    /// Each task settles in its own transaction; one racing a concurrent
    /// confirmation loses safely and is skipped. Returns the number of
    /// tasks settled.
    pub fn expiry_sweep(&self, now: DateTime<Utc>) -> LedgerResult<usize> {
        let cutoff = now - self.grace;
        let expired = self.store.expired_task_ids(cutoff)?;
        let mut settled = 0;
        for id in expired {
            match self.store.settle(id, None, now) {
                Ok(_) => {
                    tracing::info!(task = %id, "task auto-settled by expiry sweep");
                    settled += 1;
                }
                // A confirmation landed between the select and the settle.
                Err(LedgerError::NotInProgress) => {}
                Err(e) => {
                    tracing::warn!(task = %id, "expiry sweep failed to settle task: {e}");
                }
            }
        }
        Ok(settled)
    }

    /// Record a review from one task principal to the other.
    pub fn submit_review(
        &self,
        task: TaskId,
        reviewer: UserId,
        rating: f64,
        comment: Option<String>,
    ) -> LedgerResult<Review> {
        if !valid_rating(rating) {
            return Err(LedgerError::InvalidRating);
        }
        self.store.insert_review(task, reviewer, rating, comment, Utc::now())
    }
}

/// Ratings run 1.0 to 5.0 in half-star steps.
fn valid_rating(rating: f64) -> bool {
    (1.0..=5.0).contains(&rating) && (rating * 2.0).fract() == 0.0
}
