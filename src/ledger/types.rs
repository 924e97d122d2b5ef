//! Domain types owned by the ledger store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type TaskId = Uuid;

/// Campus a user belongs to or a task takes place on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Campus {
    Main,
    Downtown,
    OffCampus,
    Online,
}

impl Campus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Downtown => "downtown",
            Self::OffCampus => "off_campus",
            Self::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Self::Main),
            "downtown" => Some(Self::Downtown),
            "off_campus" => Some(Self::OffCampus),
            "online" => Some(Self::Online),
            _ => None,
        }
    }
}

impl std::fmt::Display for Campus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Soft status flag on a user record; users are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// A member of the closed user population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub campus: Campus,
    pub skills: Vec<String>,
    /// Point balance; escrow debits keep this >= 0.
    pub points: i64,
    pub avg_rating: f64,
    pub completed_tasks: i64,
    /// Derived from reviews + completion volume, 0..=1.
    pub trust_score: f64,
    pub willing_cross_campus: bool,
    /// Advisory commitments (YYYY-MM-DD) used by schedule-fit scoring.
    pub busy_dates: Vec<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for onboarding a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub campus: Campus,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub willing_cross_campus: bool,
}

/// Task state machine: `open -> in_progress -> completed`, `open -> cancelled`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Advisory scheduling hints. Not validated against real calendars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleHints {
    /// Preferred date (YYYY-MM-DD).
    pub preferred_date: Option<String>,
    /// Preferred start time (HH:MM).
    pub start_time: Option<String>,
    /// Free-form estimated duration.
    pub duration: Option<String>,
}

/// A help task. The stake is fixed at creation and held in escrow until
/// settlement (confirmation or expiry sweep) or refund on cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub publisher_id: UserId,
    /// Set to exactly one value exactly once; never reassigned or cleared.
    pub accepted_user_id: Option<UserId>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub campus: Campus,
    pub stake: i64,
    pub is_urgent: bool,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub hints: ScheduleHints,
    pub helper_notified_completion: bool,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for publishing a task. Content must pass risk screening first.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub campus: Campus,
    pub stake: i64,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(flatten)]
    pub hints: ScheduleHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// An application by a helper for an open task. Unique per (task, applicant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub task_id: TaskId,
    pub applicant_id: UserId,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
}

/// A post-completion review between the two task principals.
/// One per (task, reviewer -> reviewee) direction, immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub task_id: TaskId,
    pub reviewer_id: UserId,
    pub reviewee_id: UserId,
    pub rating: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An open task joined with its publisher's rating, for the matching engine.
#[derive(Debug, Clone, Serialize)]
pub struct OpenTaskListing {
    pub task: Task,
    pub publisher_rating: f64,
}
