//! Ledger store - the sole owner of all persistent state.
//!
//! Users, tasks, applications, and reviews live in SQLite. Every lifecycle
//! mutation runs as a single transaction, and the two classic check-then-act
//! races (escrow debit, acceptance slot) are closed with conditional UPDATE
//! statements checked by rows-affected, not by a separate read followed by a
//! write. Correctness therefore does not depend on in-process locking; the
//! same SQL is safe with a connection pool or multiple processes.

pub mod types;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::reputation;
use types::{
    Application, ApplicationStatus, Campus, NewUser, OpenTaskListing, Review, ScheduleHints,
    Task, TaskDraft, TaskId, TaskStatus, User, UserId, UserStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                   BLOB PRIMARY KEY,
    email                TEXT NOT NULL UNIQUE,
    name                 TEXT NOT NULL,
    campus               TEXT NOT NULL,
    skills               TEXT NOT NULL DEFAULT '[]',
    points               INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
    avg_rating           REAL NOT NULL DEFAULT 5.0,
    completed_tasks      INTEGER NOT NULL DEFAULT 0,
    trust_score          REAL NOT NULL DEFAULT 1.0,
    willing_cross_campus INTEGER NOT NULL DEFAULT 0,
    busy_dates           TEXT NOT NULL DEFAULT '[]',
    status               TEXT NOT NULL DEFAULT 'active',
    created_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id               BLOB PRIMARY KEY,
    publisher_id     BLOB NOT NULL REFERENCES users(id),
    accepted_user_id BLOB REFERENCES users(id),
    title            TEXT NOT NULL,
    description      TEXT NOT NULL,
    category         TEXT NOT NULL,
    location         TEXT NOT NULL,
    campus           TEXT NOT NULL,
    stake            INTEGER NOT NULL,
    is_urgent        INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL DEFAULT 'open',
    preferred_date   TEXT,
    start_time       TEXT,
    duration         TEXT,
    helper_notified  INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    accepted_at      TEXT,
    completed_at     TEXT
);

CREATE TABLE IF NOT EXISTS applications (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id      BLOB NOT NULL REFERENCES tasks(id),
    applicant_id BLOB NOT NULL REFERENCES users(id),
    status       TEXT NOT NULL DEFAULT 'pending',
    applied_at   TEXT NOT NULL,
    UNIQUE(task_id, applicant_id)
);

CREATE TABLE IF NOT EXISTS reviews (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id     BLOB NOT NULL REFERENCES tasks(id),
    reviewer_id BLOB NOT NULL REFERENCES users(id),
    reviewee_id BLOB NOT NULL REFERENCES users(id),
    rating      REAL NOT NULL,
    comment     TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE(task_id, reviewer_id, reviewee_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_applications_task ON applications(task_id);
CREATE INDEX IF NOT EXISTS idx_reviews_reviewee ON reviews(reviewee_id);
"#;

const USER_COLS: &str = "id, email, name, campus, skills, points, avg_rating, \
     completed_tasks, trust_score, willing_cross_campus, busy_dates, status, created_at";

const TASK_COLS: &str = "id, publisher_id, accepted_user_id, title, description, category, \
     location, campus, stake, is_urgent, status, preferred_date, start_time, duration, \
     helper_notified, created_at, accepted_at, completed_at";

/// Point totals and record counts for the operations dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub users: i64,
    pub open_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    /// User balances plus stakes escrowed in open/in-progress tasks.
    /// Invariant: unchanged by any publish/cancel/settle sequence.
    pub points_in_circulation: i64,
}

/// SQLite-backed ledger store.
pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory ledger, used by tests.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex only means another thread panicked mid-query;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Users ====================

    /// Onboard a new user with the configured starting balance.
    pub fn create_user(&self, new: NewUser, starting_points: i64) -> LedgerResult<User> {
        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let skills = serde_json::to_string(&new.skills).unwrap_or_else(|_| "[]".into());
        let result = conn.execute(
            "INSERT INTO users (id, email, name, campus, skills, points, willing_cross_campus, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                new.email,
                new.name,
                new.campus.as_str(),
                skills,
                starting_points,
                new.willing_cross_campus,
                now
            ],
        );
        match result {
            Ok(_) => user_in_conn(&conn, id),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    pub fn user(&self, id: UserId) -> LedgerResult<User> {
        user_in_conn(&self.lock(), id)
    }

    /// All active users.
    pub fn list_users(&self) -> LedgerResult<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLS} FROM users WHERE status = 'active' ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_skills(&self, id: UserId, skills: &[String]) -> LedgerResult<()> {
        let conn = self.lock();
        let json = serde_json::to_string(skills).unwrap_or_else(|_| "[]".into());
        let n = conn.execute(
            "UPDATE users SET skills = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        if n == 0 {
            return Err(LedgerError::UserNotFound(id));
        }
        Ok(())
    }

    pub fn update_busy_dates(&self, id: UserId, busy_dates: &[String]) -> LedgerResult<()> {
        let conn = self.lock();
        let json = serde_json::to_string(busy_dates).unwrap_or_else(|_| "[]".into());
        let n = conn.execute(
            "UPDATE users SET busy_dates = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        if n == 0 {
            return Err(LedgerError::UserNotFound(id));
        }
        Ok(())
    }

    // ==================== Tasks ====================

    pub fn task(&self, id: TaskId) -> LedgerResult<Task> {
        task_in_conn(&self.lock(), id)
    }

    /// List tasks, optionally filtered by status and excluding a publisher.
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        exclude_publisher: Option<UserId>,
    ) -> LedgerResult<Vec<Task>> {
        let conn = self.lock();
        let mut sql = format!("SELECT {TASK_COLS} FROM tasks WHERE 1=1");
        if let Some(st) = status {
            sql.push_str(&format!(" AND status = '{}'", st.as_str()));
        }
        let rows = if let Some(ex) = exclude_publisher {
            sql.push_str(" AND publisher_id != ?1 ORDER BY created_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![ex], task_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            sql.push_str(" ORDER BY created_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], task_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Tasks published by a user, newest first.
    pub fn tasks_published_by(&self, publisher: UserId) -> LedgerResult<Vec<Task>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE publisher_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![publisher], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Open tasks joined with the publisher's rating, oldest first so that
    /// ranking ties break deterministically by earlier creation time.
    pub fn open_task_listings(
        &self,
        exclude_publisher: Option<UserId>,
    ) -> LedgerResult<Vec<OpenTaskListing>> {
        let conn = self.lock();
        let base = format!(
            "SELECT t.id, t.publisher_id, t.accepted_user_id, t.title, t.description, \
             t.category, t.location, t.campus, t.stake, t.is_urgent, t.status, \
             t.preferred_date, t.start_time, t.duration, t.helper_notified, t.created_at, \
             t.accepted_at, t.completed_at, u.avg_rating \
             FROM tasks t JOIN users u ON u.id = t.publisher_id \
             WHERE t.status = 'open'"
        );
        let map = |row: &Row| -> rusqlite::Result<OpenTaskListing> {
            Ok(OpenTaskListing {
                task: task_from_row(row)?,
                publisher_rating: row.get(18)?,
            })
        };
        let rows = if let Some(ex) = exclude_publisher {
            let sql = format!("{base} AND t.publisher_id != ?1 ORDER BY t.created_at ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![ex], map)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let sql = format!("{base} ORDER BY t.created_at ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], map)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Atomically debit the publisher's balance and insert the task in `open`.
    ///
    /// The debit is a conditional update (`points >= stake`), so a concurrent
    /// publish can never overdraw the balance.
    pub fn create_task_escrowed(
        &self,
        publisher: UserId,
        draft: &TaskDraft,
        now: DateTime<Utc>,
    ) -> LedgerResult<Task> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let debited = tx.execute(
            "UPDATE users SET points = points - ?1 \
             WHERE id = ?2 AND status = 'active' AND points >= ?1",
            params![draft.stake, publisher],
        )?;
        if debited == 0 {
            let balance: Option<i64> = tx
                .query_row(
                    "SELECT points FROM users WHERE id = ?1 AND status = 'active'",
                    params![publisher],
                    |r| r.get(0),
                )
                .optional()?;
            return match balance {
                Some(balance) => Err(LedgerError::InsufficientFunds {
                    balance,
                    required: draft.stake,
                }),
                None => Err(LedgerError::UserNotFound(publisher)),
            };
        }

        let id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO tasks (id, publisher_id, title, description, category, location, \
             campus, stake, is_urgent, status, preferred_date, start_time, duration, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'open', ?10, ?11, ?12, ?13)",
            params![
                id,
                publisher,
                draft.title,
                draft.description,
                draft.category,
                draft.location,
                draft.campus.as_str(),
                draft.stake,
                draft.is_urgent,
                draft.hints.preferred_date,
                draft.hints.start_time,
                draft.hints.duration,
                now
            ],
        )?;

        let task = task_in_conn(&tx, id)?;
        tx.commit()?;
        Ok(task)
    }

    // ==================== Applications ====================

    /// Record a pending application. The UNIQUE constraint on
    /// (task, applicant) enforces one application per applicant.
    pub fn insert_application(
        &self,
        task_id: TaskId,
        applicant: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Application> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (publisher, status) = task_head(&tx, task_id)?;
        if status != TaskStatus::Open {
            return Err(LedgerError::TaskNotOpen);
        }
        if publisher == applicant {
            return Err(LedgerError::SelfApplication);
        }
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1 AND status = 'active'",
                params![applicant],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(LedgerError::UserNotFound(applicant));
        }

        let inserted = tx.execute(
            "INSERT INTO applications (task_id, applicant_id, status, applied_at) \
             VALUES (?1, ?2, 'pending', ?3)",
            params![task_id, applicant, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(LedgerError::DuplicateApplication),
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Application {
            id,
            task_id,
            applicant_id: applicant,
            status: ApplicationStatus::Pending,
            applied_at: now,
        })
    }

    pub fn applications_for_task(&self, task_id: TaskId) -> LedgerResult<Vec<Application>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, applicant_id, status, applied_at FROM applications \
             WHERE task_id = ?1 ORDER BY applied_at",
        )?;
        let rows = stmt.query_map(params![task_id], application_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn applications_by_user(&self, applicant: UserId) -> LedgerResult<Vec<Application>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, applicant_id, status, applied_at FROM applications \
             WHERE applicant_id = ?1 ORDER BY applied_at DESC",
        )?;
        let rows = stmt.query_map(params![applicant], application_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Atomically accept one applicant: the exclusivity gate.
    ///
    /// The transition is a compare-and-set on (`status = 'open'`,
    /// `accepted_user_id IS NULL`); when two accepts race, exactly one
    /// update takes effect and the loser sees `AlreadyAccepted`.
    pub fn accept_application(
        &self,
        task_id: TaskId,
        applicant: UserId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Task> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (publisher, _) = task_head(&tx, task_id)?;
        if actor != publisher {
            return Err(LedgerError::NotAuthorized);
        }
        let applied: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM applications WHERE task_id = ?1 AND applicant_id = ?2",
                params![task_id, applicant],
                |r| r.get(0),
            )
            .optional()?;
        if applied.is_none() {
            return Err(LedgerError::ApplicationNotFound);
        }

        let transitioned = tx.execute(
            "UPDATE tasks SET status = 'in_progress', accepted_user_id = ?1, accepted_at = ?2 \
             WHERE id = ?3 AND status = 'open' AND accepted_user_id IS NULL",
            params![applicant, now, task_id],
        )?;
        if transitioned == 0 {
            let (_, status) = task_head(&tx, task_id)?;
            return match status {
                TaskStatus::InProgress | TaskStatus::Completed => {
                    Err(LedgerError::AlreadyAccepted)
                }
                _ => Err(LedgerError::TaskNotOpen),
            };
        }

        tx.execute(
            "UPDATE applications SET status = 'accepted' \
             WHERE task_id = ?1 AND applicant_id = ?2",
            params![task_id, applicant],
        )?;
        tx.execute(
            "UPDATE applications SET status = 'rejected' \
             WHERE task_id = ?1 AND applicant_id != ?2",
            params![task_id, applicant],
        )?;

        let task = task_in_conn(&tx, task_id)?;
        tx.commit()?;
        Ok(task)
    }

    // ==================== Completion & settlement ====================

    /// Record that the helper has signaled completion. Idempotent; no
    /// balance change.
    pub fn set_helper_notified(&self, task_id: TaskId, helper: UserId) -> LedgerResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (status, accepted): (String, Option<UserId>) = tx
            .query_row(
                "SELECT status, accepted_user_id FROM tasks WHERE id = ?1",
                params![task_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        if TaskStatus::parse(&status) != Some(TaskStatus::InProgress) {
            return Err(LedgerError::NotInProgress);
        }
        if accepted != Some(helper) {
            return Err(LedgerError::NotAuthorized);
        }

        tx.execute(
            "UPDATE tasks SET helper_notified = 1 WHERE id = ?1",
            params![task_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Settle a task: credit the stake to the helper, bump both principals'
    /// completion counters, and mark the task completed.
    ///
    /// `actor = Some(publisher)` is publisher confirmation; `actor = None`
    /// is the expiry sweep. The transition is conditional on the task still
    /// being `in_progress`, so a sweep racing a confirmation loses safely
    /// with `NotInProgress` and performs no duplicate credit.
    pub fn settle(
        &self,
        task_id: TaskId,
        actor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Task> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (publisher, helper, stake): (UserId, Option<UserId>, i64) = tx
            .query_row(
                "SELECT publisher_id, accepted_user_id, stake FROM tasks WHERE id = ?1",
                params![task_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        if let Some(actor) = actor {
            if actor != publisher {
                return Err(LedgerError::NotAuthorized);
            }
        }

        let transitioned = tx.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1 \
             WHERE id = ?2 AND status = 'in_progress'",
            params![now, task_id],
        )?;
        if transitioned == 0 {
            return Err(LedgerError::NotInProgress);
        }
        let helper = helper.ok_or(LedgerError::NotInProgress)?;

        tx.execute(
            "UPDATE users SET points = points + ?1, completed_tasks = completed_tasks + 1 \
             WHERE id = ?2",
            params![stake, helper],
        )?;
        tx.execute(
            "UPDATE users SET completed_tasks = completed_tasks + 1 WHERE id = ?1",
            params![publisher],
        )?;

        let task = task_in_conn(&tx, task_id)?;
        tx.commit()?;
        Ok(task)
    }

    /// Cancel an open task: refund the stake and reject pending applications.
    pub fn cancel_task(&self, task_id: TaskId, actor: UserId) -> LedgerResult<Task> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (publisher, stake): (UserId, i64) = tx
            .query_row(
                "SELECT publisher_id, stake FROM tasks WHERE id = ?1",
                params![task_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        if actor != publisher {
            return Err(LedgerError::NotAuthorized);
        }

        let transitioned = tx.execute(
            "UPDATE tasks SET status = 'cancelled' WHERE id = ?1 AND status = 'open'",
            params![task_id],
        )?;
        if transitioned == 0 {
            return Err(LedgerError::TaskNotOpen);
        }

        tx.execute(
            "UPDATE users SET points = points + ?1 WHERE id = ?2",
            params![stake, publisher],
        )?;
        tx.execute(
            "UPDATE applications SET status = 'rejected' \
             WHERE task_id = ?1 AND status = 'pending'",
            params![task_id],
        )?;

        let task = task_in_conn(&tx, task_id)?;
        tx.commit()?;
        Ok(task)
    }

    /// Ids of in-progress tasks accepted before the cutoff.
    pub fn expired_task_ids(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<TaskId>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM tasks \
             WHERE status = 'in_progress' AND accepted_at IS NOT NULL AND accepted_at < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ==================== Reviews ====================

    /// Record a review from one task principal to the other and recompute
    /// the reviewee's reputation in the same transaction.
    ///
    /// The reviewee is derived, never supplied: the reviewer must be the
    /// publisher or the accepted helper, and the review always targets the
    /// opposite principal.
    pub fn insert_review(
        &self,
        task_id: TaskId,
        reviewer: UserId,
        rating: f64,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Review> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let (publisher, helper, status): (UserId, Option<UserId>, String) = tx
            .query_row(
                "SELECT publisher_id, accepted_user_id, status FROM tasks WHERE id = ?1",
                params![task_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        if TaskStatus::parse(&status) != Some(TaskStatus::Completed) {
            return Err(LedgerError::NotCompleted);
        }
        let helper = helper.ok_or(LedgerError::NotCompleted)?;
        let reviewee = if reviewer == publisher {
            helper
        } else if reviewer == helper {
            publisher
        } else {
            return Err(LedgerError::NotAuthorized);
        };

        let inserted = tx.execute(
            "INSERT INTO reviews (task_id, reviewer_id, reviewee_id, rating, comment, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, reviewer, reviewee, rating, comment, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(LedgerError::DuplicateReview),
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();

        // Full recompute from the review set; no incremental drift.
        let ratings: Vec<f64> = {
            let mut stmt = tx.prepare("SELECT rating FROM reviews WHERE reviewee_id = ?1")?;
            let rows = stmt.query_map(params![reviewee], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let completed: i64 = tx.query_row(
            "SELECT completed_tasks FROM users WHERE id = ?1",
            params![reviewee],
            |r| r.get(0),
        )?;
        let (avg, trust) = reputation::recompute(&ratings, completed);
        tx.execute(
            "UPDATE users SET avg_rating = ?1, trust_score = ?2 WHERE id = ?3",
            params![avg, trust, reviewee],
        )?;

        tx.commit()?;
        Ok(Review {
            id,
            task_id,
            reviewer_id: reviewer,
            reviewee_id: reviewee,
            rating,
            comment,
            created_at: now,
        })
    }

    pub fn reviews_for_user(&self, reviewee: UserId) -> LedgerResult<Vec<Review>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, reviewer_id, reviewee_id, rating, comment, created_at \
             FROM reviews WHERE reviewee_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![reviewee], review_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ==================== Stats ====================

    pub fn stats(&self) -> LedgerResult<LedgerStats> {
        let conn = self.lock();
        let count = |sql: &str| -> LedgerResult<i64> {
            Ok(conn.query_row(sql, [], |r| r.get(0))?)
        };
        Ok(LedgerStats {
            users: count("SELECT COUNT(*) FROM users WHERE status = 'active'")?,
            open_tasks: count("SELECT COUNT(*) FROM tasks WHERE status = 'open'")?,
            in_progress_tasks: count("SELECT COUNT(*) FROM tasks WHERE status = 'in_progress'")?,
            completed_tasks: count("SELECT COUNT(*) FROM tasks WHERE status = 'completed'")?,
            points_in_circulation: count(
                "SELECT (SELECT COALESCE(SUM(points), 0) FROM users) + \
                 (SELECT COALESCE(SUM(stake), 0) FROM tasks \
                  WHERE status IN ('open', 'in_progress'))",
            )?,
        })
    }
}

// ==================== Row mapping ====================

fn bad_column(idx: usize, msg: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.to_string().into(),
    )
}

fn json_list(idx: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let campus_raw: String = row.get(3)?;
    let skills_raw: String = row.get(4)?;
    let busy_raw: String = row.get(10)?;
    let status_raw: String = row.get(11)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        campus: Campus::parse(&campus_raw).ok_or_else(|| bad_column(3, "unknown campus"))?,
        skills: json_list(4, &skills_raw)?,
        points: row.get(5)?,
        avg_rating: row.get(6)?,
        completed_tasks: row.get(7)?,
        trust_score: row.get(8)?,
        willing_cross_campus: row.get(9)?,
        busy_dates: json_list(10, &busy_raw)?,
        status: UserStatus::parse(&status_raw).ok_or_else(|| bad_column(11, "unknown user status"))?,
        created_at: row.get(12)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let campus_raw: String = row.get(7)?;
    let status_raw: String = row.get(10)?;
    Ok(Task {
        id: row.get(0)?,
        publisher_id: row.get(1)?,
        accepted_user_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        location: row.get(6)?,
        campus: Campus::parse(&campus_raw).ok_or_else(|| bad_column(7, "unknown campus"))?,
        stake: row.get(8)?,
        is_urgent: row.get(9)?,
        status: TaskStatus::parse(&status_raw).ok_or_else(|| bad_column(10, "unknown task status"))?,
        hints: ScheduleHints {
            preferred_date: row.get(11)?,
            start_time: row.get(12)?,
            duration: row.get(13)?,
        },
        helper_notified_completion: row.get(14)?,
        created_at: row.get(15)?,
        accepted_at: row.get(16)?,
        completed_at: row.get(17)?,
    })
}

fn application_from_row(row: &Row) -> rusqlite::Result<Application> {
    let status_raw: String = row.get(3)?;
    Ok(Application {
        id: row.get(0)?,
        task_id: row.get(1)?,
        applicant_id: row.get(2)?,
        status: ApplicationStatus::parse(&status_raw)
            .ok_or_else(|| bad_column(3, "unknown application status"))?,
        applied_at: row.get(4)?,
    })
}

fn review_from_row(row: &Row) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        task_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        reviewee_id: row.get(3)?,
        rating: row.get(4)?,
        comment: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn user_in_conn(conn: &Connection, id: UserId) -> LedgerResult<User> {
    conn.query_row(
        &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()?
    .ok_or(LedgerError::UserNotFound(id))
}

fn task_in_conn(conn: &Connection, id: TaskId) -> LedgerResult<Task> {
    conn.query_row(
        &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
        params![id],
        task_from_row,
    )
    .optional()?
    .ok_or(LedgerError::TaskNotFound(id))
}

/// (publisher_id, status) for a task, or `TaskNotFound`.
fn task_head(conn: &Connection, id: TaskId) -> LedgerResult<(UserId, TaskStatus)> {
    let (publisher, status_raw): (UserId, String) = conn
        .query_row(
            "SELECT publisher_id, status FROM tasks WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or(LedgerError::TaskNotFound(id))?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| LedgerError::Storage(bad_column(1, "unknown task status")))?;
    Ok((publisher, status))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, campus: Campus) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            campus,
            skills: vec![],
            willing_cross_campus: false,
        }
    }

    fn draft(stake: i64) -> TaskDraft {
        TaskDraft {
            title: "Carry boxes between dorms".into(),
            description: "A few boxes and one suitcase, about twenty minutes.".into(),
            category: "daily support".into(),
            location: "Dorm A".into(),
            campus: Campus::Main,
            stake,
            is_urgent: false,
            hints: ScheduleHints::default(),
        }
    }

    #[test]
    fn test_escrow_debit_is_conditional() {
        let store = LedgerStore::open_in_memory().unwrap();
        let alice = store.create_user(new_user("alice@example.edu", Campus::Main), 40).unwrap();

        let err = store
            .create_task_escrowed(alice.id, &draft(50), Utc::now())
            .unwrap_err();
        match err {
            LedgerError::InsufficientFunds { balance, required } => {
                assert_eq!(balance, 40);
                assert_eq!(required, 50);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failed publish must not touch the balance.
        assert_eq!(store.user(alice.id).unwrap().points, 40);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.create_user(new_user("a@example.edu", Campus::Main), 100).unwrap();
        let err = store
            .create_user(new_user("a@example.edu", Campus::Downtown), 100)
            .unwrap_err();
        assert!(matches!(err, LedgerError::EmailTaken));
    }

    #[test]
    fn test_accepted_slot_set_exactly_once() {
        let store = LedgerStore::open_in_memory().unwrap();
        let pub_ = store.create_user(new_user("p@example.edu", Campus::Main), 100).unwrap();
        let a = store.create_user(new_user("a@example.edu", Campus::Main), 100).unwrap();
        let b = store.create_user(new_user("b@example.edu", Campus::Main), 100).unwrap();
        let task = store.create_task_escrowed(pub_.id, &draft(50), Utc::now()).unwrap();

        store.insert_application(task.id, a.id, Utc::now()).unwrap();
        store.insert_application(task.id, b.id, Utc::now()).unwrap();

        store.accept_application(task.id, a.id, pub_.id, Utc::now()).unwrap();
        let err = store
            .accept_application(task.id, b.id, pub_.id, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyAccepted));

        let task = store.task(task.id).unwrap();
        assert_eq!(task.accepted_user_id, Some(a.id));
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_review_updates_reputation_in_same_transaction() {
        let store = LedgerStore::open_in_memory().unwrap();
        let pub_ = store.create_user(new_user("p@example.edu", Campus::Main), 100).unwrap();
        let helper = store.create_user(new_user("h@example.edu", Campus::Main), 0).unwrap();
        let task = store.create_task_escrowed(pub_.id, &draft(50), Utc::now()).unwrap();
        store.insert_application(task.id, helper.id, Utc::now()).unwrap();
        store.accept_application(task.id, helper.id, pub_.id, Utc::now()).unwrap();
        store.settle(task.id, Some(pub_.id), Utc::now()).unwrap();

        store
            .insert_review(task.id, pub_.id, 4.0, Some("solid work".into()), Utc::now())
            .unwrap();
        let helper = store.user(helper.id).unwrap();
        assert_eq!(helper.avg_rating, 4.0);
        // 0.7 * (4/5) + 0.3 * min(1, 1/50) = 0.56 + 0.006 -> 0.57
        assert_eq!(helper.trust_score, 0.57);

        let err = store
            .insert_review(task.id, pub_.id, 5.0, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReview));
    }

    #[test]
    fn test_review_only_principals_after_completion() {
        let store = LedgerStore::open_in_memory().unwrap();
        let pub_ = store.create_user(new_user("p@example.edu", Campus::Main), 100).unwrap();
        let helper = store.create_user(new_user("h@example.edu", Campus::Main), 0).unwrap();
        let outsider = store.create_user(new_user("o@example.edu", Campus::Main), 0).unwrap();
        let task = store.create_task_escrowed(pub_.id, &draft(50), Utc::now()).unwrap();
        store.insert_application(task.id, helper.id, Utc::now()).unwrap();
        store.accept_application(task.id, helper.id, pub_.id, Utc::now()).unwrap();

        // Not completed yet.
        let err = store
            .insert_review(task.id, pub_.id, 5.0, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotCompleted));

        store.settle(task.id, Some(pub_.id), Utc::now()).unwrap();
        let err = store
            .insert_review(task.id, outsider.id, 5.0, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthorized));

        // Helper reviews the publisher; direction is derived.
        let review = store
            .insert_review(task.id, helper.id, 4.5, None, Utc::now())
            .unwrap();
        assert_eq!(review.reviewee_id, pub_.id);
    }

    #[test]
    fn test_points_in_circulation_constant_across_lifecycle() {
        let store = LedgerStore::open_in_memory().unwrap();
        let pub_ = store.create_user(new_user("p@example.edu", Campus::Main), 100).unwrap();
        let helper = store.create_user(new_user("h@example.edu", Campus::Main), 30).unwrap();
        let total = store.stats().unwrap().points_in_circulation;
        assert_eq!(total, 130);

        let task = store.create_task_escrowed(pub_.id, &draft(50), Utc::now()).unwrap();
        assert_eq!(store.stats().unwrap().points_in_circulation, total);

        store.insert_application(task.id, helper.id, Utc::now()).unwrap();
        store.accept_application(task.id, helper.id, pub_.id, Utc::now()).unwrap();
        assert_eq!(store.stats().unwrap().points_in_circulation, total);

        store.settle(task.id, Some(pub_.id), Utc::now()).unwrap();
        assert_eq!(store.stats().unwrap().points_in_circulation, total);
        assert_eq!(store.user(helper.id).unwrap().points, 80);

        // Cancellation path conserves as well.
        let task2 = store.create_task_escrowed(pub_.id, &draft(20), Utc::now()).unwrap();
        store.cancel_task(task2.id, pub_.id).unwrap();
        assert_eq!(store.stats().unwrap().points_in_circulation, total);
    }
}
