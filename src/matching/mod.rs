//! Matching engine - scores open tasks against a user profile.
//!
//! Pure functions over ledger views; never mutates state. Repeated calls
//! with unchanged inputs produce identical rankings.

use serde::{Deserialize, Serialize};

use crate::ledger::types::{Campus, OpenTaskListing, Task, User};

/// Component weights for the total match score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchWeights {
    pub skill: f64,
    pub schedule: f64,
    pub reputation: f64,
    pub locality: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            skill: 0.4,
            schedule: 0.2,
            reputation: 0.2,
            locality: 0.2,
        }
    }
}

impl MatchWeights {
    pub fn is_valid(&self) -> bool {
        let sum = self.skill + self.schedule + self.reputation + self.locality;
        (sum - 1.0).abs() < 1e-9
            && self.skill >= 0.0
            && self.schedule >= 0.0
            && self.reputation >= 0.0
            && self.locality >= 0.0
    }
}

/// Per-component breakdown of a match, each normalized to [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatchScore {
    pub total: f64,
    pub skill: f64,
    pub schedule: f64,
    pub reputation: f64,
    pub locality: f64,
}

/// A ranked recommendation for a user.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub task: Task,
    pub publisher_rating: f64,
    pub score: MatchScore,
}

#[derive(Debug, Clone)]
pub struct MatchingEngine {
    weights: MatchWeights,
    /// Locality credit for a cross-campus match the user has opted into.
    cross_campus_credit: f64,
}

impl MatchingEngine {
    pub fn new(weights: MatchWeights, cross_campus_credit: f64) -> Self {
        debug_assert!(weights.is_valid(), "match weights must sum to 1.0");
        Self {
            weights,
            cross_campus_credit: cross_campus_credit.clamp(0.0, 1.0),
        }
    }

    /// Score one task for one user. Pure; no side effects.
    pub fn score(&self, user: &User, task: &Task, publisher_rating: f64) -> MatchScore {
        let skill = skill_score(&user.skills, task);
        let schedule = schedule_score(user, task);
        let reputation = (publisher_rating / 5.0).clamp(0.0, 1.0);
        let locality = self.locality_score(user, task);
        let total = self.weights.skill * skill
            + self.weights.schedule * schedule
            + self.weights.reputation * reputation
            + self.weights.locality * locality;
        MatchScore {
            total,
            skill,
            schedule,
            reputation,
            locality,
        }
    }

    /// Rank open tasks for a user, best match first. Ties break by earlier
    /// creation time, so the ordering is total and deterministic.
    pub fn rank(&self, user: &User, listings: &[OpenTaskListing]) -> Vec<Recommendation> {
        let mut ranked: Vec<Recommendation> = listings
            .iter()
            .map(|l| Recommendation {
                task: l.task.clone(),
                publisher_rating: l.publisher_rating,
                score: self.score(user, &l.task, l.publisher_rating),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.task.created_at.cmp(&b.task.created_at))
        });
        ranked
    }

    fn locality_score(&self, user: &User, task: &Task) -> f64 {
        // Online tasks require no travel.
        if task.campus == Campus::Online || user.campus == task.campus {
            1.0
        } else if user.willing_cross_campus {
            self.cross_campus_credit
        } else {
            0.0
        }
    }
}

/// Overlap ratio between the user's skills and the task's category +
/// description text. Matching is by containment of the normalized skill in
/// the normalized text, because skill labels are often CJK phrases that
/// whitespace tokenization would never split out. Empty skill set scores 0.
fn skill_score(skills: &[String], task: &Task) -> f64 {
    if skills.is_empty() {
        return 0.0;
    }
    let text = format!("{} {}", task.category, task.description).to_lowercase();
    let matched = skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && text.contains(s.as_str()))
        .count();
    matched as f64 / skills.len() as f64
}

/// 1.0 unless the task's advisory preferred date collides with one of the
/// user's known commitments.
fn schedule_score(user: &User, task: &Task) -> f64 {
    match &task.hints.preferred_date {
        Some(date) if user.busy_dates.iter().any(|d| d == date) => 0.0,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{ScheduleHints, TaskStatus};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn user(campus: Campus, skills: &[&str]) -> User {
        User {
            id: Uuid::new_v4(),
            email: "u@example.edu".into(),
            name: "u".into(),
            campus,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            points: 100,
            avg_rating: 5.0,
            completed_tasks: 0,
            trust_score: 1.0,
            willing_cross_campus: false,
            busy_dates: vec![],
            status: crate::ledger::types::UserStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn task(campus: Campus, description: &str, created_secs: i64) -> Task {
        Task {
            id: Uuid::new_v4(),
            publisher_id: Uuid::new_v4(),
            accepted_user_id: None,
            title: "t".into(),
            description: description.into(),
            category: "daily support".into(),
            location: "somewhere".into(),
            campus,
            stake: 50,
            is_urgent: false,
            status: TaskStatus::Open,
            hints: ScheduleHints::default(),
            helper_notified_completion: false,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            accepted_at: None,
            completed_at: None,
        }
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(MatchWeights::default(), 0.5)
    }

    #[test]
    fn test_empty_skill_set_scores_zero_not_nan() {
        let u = user(Campus::Main, &[]);
        let t = task(Campus::Main, "help with photography", 0);
        let s = engine().score(&u, &t, 5.0);
        assert_eq!(s.skill, 0.0);
        assert!(s.total.is_finite());
    }

    #[test]
    fn test_skill_overlap_handles_cjk_labels() {
        let u = user(Campus::Main, &["攝影", "修理電腦"]);
        let t = task(Campus::Main, "需要有攝影經驗的人記錄活動", 0);
        let s = engine().score(&u, &t, 5.0);
        assert_eq!(s.skill, 0.5);
    }

    #[test]
    fn test_locality_cross_campus_requires_opt_in() {
        let t = task(Campus::Downtown, "anything", 0);
        let mut u = user(Campus::Main, &[]);
        assert_eq!(engine().score(&u, &t, 5.0).locality, 0.0);
        u.willing_cross_campus = true;
        assert_eq!(engine().score(&u, &t, 5.0).locality, 0.5);
        // Online tasks always score full locality.
        let online = task(Campus::Online, "anything", 0);
        u.willing_cross_campus = false;
        assert_eq!(engine().score(&u, &online, 5.0).locality, 1.0);
    }

    #[test]
    fn test_schedule_conflict_zeroes_component() {
        let mut u = user(Campus::Main, &[]);
        u.busy_dates = vec!["2026-09-01".into()];
        let mut t = task(Campus::Main, "anything", 0);
        t.hints.preferred_date = Some("2026-09-01".into());
        assert_eq!(engine().score(&u, &t, 5.0).schedule, 0.0);
        t.hints.preferred_date = Some("2026-09-02".into());
        assert_eq!(engine().score(&u, &t, 5.0).schedule, 1.0);
    }

    #[test]
    fn test_rank_is_idempotent_and_ties_break_by_creation() {
        let u = user(Campus::Main, &[]);
        // Identical tasks except creation time: tie on score, earlier wins.
        let older = task(Campus::Main, "same", 100);
        let newer = task(Campus::Main, "same", 200);
        let listings = vec![
            OpenTaskListing { task: newer.clone(), publisher_rating: 4.0 },
            OpenTaskListing { task: older.clone(), publisher_rating: 4.0 },
        ];
        let eng = engine();
        let first = eng.rank(&u, &listings);
        let second = eng.rank(&u, &listings);
        assert_eq!(first[0].task.id, older.id);
        let ids: Vec<_> = first.iter().map(|r| r.task.id).collect();
        let ids2: Vec<_> = second.iter().map(|r| r.task.id).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(MatchWeights::default().is_valid());
        let bad = MatchWeights { skill: 0.5, schedule: 0.5, reputation: 0.5, locality: 0.5 };
        assert!(!bad.is_valid());
    }
}
