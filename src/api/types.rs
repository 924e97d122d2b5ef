//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::ledger::types::{Task, TaskDraft, UserId};
use crate::moderation::RiskAssessment;

#[derive(Debug, Deserialize)]
pub struct PublishTaskRequest {
    pub publisher_id: UserId,
    #[serde(flatten)]
    pub draft: TaskDraft,
}

#[derive(Debug, Serialize)]
pub struct PublishTaskResponse {
    pub task: Task,
    /// Screening outcome, including warn-allow notices and the
    /// degraded-review flag.
    pub screening: RiskAssessment,
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub applicant_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub applicant_id: UserId,
    pub actor_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub helper_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer_id: UserId,
    pub rating: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub description: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct SkillsRequest {
    pub skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BusyDatesRequest {
    pub busy_dates: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub exclude_publisher: Option<UserId>,
}
