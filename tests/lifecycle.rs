//! End-to-end lifecycle tests against the ledger store and engine.

use std::sync::Arc;

use chrono::{Duration, Utc};

use taskbank::error::LedgerError;
use taskbank::ledger::types::{
    ApplicationStatus, Campus, NewUser, ScheduleHints, TaskDraft, TaskStatus, UserId,
};
use taskbank::ledger::LedgerStore;
use taskbank::lifecycle::TaskLifecycleEngine;
use taskbank::moderation::RiskClassifier;

fn setup() -> (Arc<LedgerStore>, TaskLifecycleEngine) {
    let store = Arc::new(LedgerStore::open_in_memory().unwrap());
    let engine = TaskLifecycleEngine::new(
        Arc::clone(&store),
        Arc::new(RiskClassifier::keyword_only()),
        5,
        10,
        500,
    );
    (store, engine)
}

fn onboard(store: &LedgerStore, email: &str, points: i64) -> UserId {
    store
        .create_user(
            NewUser {
                email: email.into(),
                name: email.split('@').next().unwrap().into(),
                campus: Campus::Main,
                skills: vec![],
                willing_cross_campus: false,
            },
            points,
        )
        .unwrap()
        .id
}

fn draft(stake: i64) -> TaskDraft {
    TaskDraft {
        title: "pick up a package".into(),
        description: "package at the campus mail room, needs a student card".into(),
        category: "daily support".into(),
        location: "mail room".into(),
        campus: Campus::Main,
        stake,
        is_urgent: false,
        hints: ScheduleHints::default(),
    }
}

#[tokio::test]
async fn test_full_lifecycle_settles_stake_to_helper() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 100);
    let a = onboard(&store, "ana@example.edu", 100);
    let b = onboard(&store, "ben@example.edu", 100);

    // Publish escrows the stake immediately.
    let (task, _) = engine.publish(publisher, draft(50)).await.unwrap();
    assert_eq!(store.user(publisher).unwrap().points, 50);
    assert_eq!(task.status, TaskStatus::Open);

    engine.apply(task.id, a).unwrap();
    engine.apply(task.id, b).unwrap();

    let task = engine.accept(task.id, a, publisher).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.accepted_user_id, Some(a));

    let applications = store.applications_for_task(task.id).unwrap();
    let status_of = |id: UserId| {
        applications
            .iter()
            .find(|app| app.applicant_id == id)
            .unwrap()
            .status
    };
    assert_eq!(status_of(a), ApplicationStatus::Accepted);
    assert_eq!(status_of(b), ApplicationStatus::Rejected);

    engine.notify_completion(task.id, a).unwrap();
    let task = engine.confirm_completion(task.id, publisher).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());

    // Helper is credited, both counters bump, publisher stays debited.
    assert_eq!(store.user(a).unwrap().points, 150);
    assert_eq!(store.user(a).unwrap().completed_tasks, 1);
    assert_eq!(store.user(publisher).unwrap().points, 50);
    assert_eq!(store.user(publisher).unwrap().completed_tasks, 1);
    assert_eq!(store.user(b).unwrap().points, 100);
}

#[tokio::test]
async fn test_points_conserved_across_operations() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 200);
    let helper = onboard(&store, "ana@example.edu", 50);
    let total = store.stats().unwrap().points_in_circulation;
    assert_eq!(total, 250);

    let (task, _) = engine.publish(publisher, draft(80)).await.unwrap();
    assert_eq!(store.stats().unwrap().points_in_circulation, total);

    engine.apply(task.id, helper).unwrap();
    engine.accept(task.id, helper, publisher).unwrap();
    assert_eq!(store.stats().unwrap().points_in_circulation, total);

    engine.confirm_completion(task.id, publisher).unwrap();
    assert_eq!(store.stats().unwrap().points_in_circulation, total);

    let (task2, _) = engine.publish(publisher, draft(30)).await.unwrap();
    engine.cancel(task2.id, publisher).unwrap();
    assert_eq!(store.stats().unwrap().points_in_circulation, total);
}

#[tokio::test]
async fn test_application_guards() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 100);
    let helper = onboard(&store, "ana@example.edu", 0);
    let (task, _) = engine.publish(publisher, draft(50)).await.unwrap();

    // Publisher cannot apply to their own task.
    let err = engine.apply(task.id, publisher).unwrap_err();
    assert!(matches!(err, LedgerError::SelfApplication));

    engine.apply(task.id, helper).unwrap();
    let err = engine.apply(task.id, helper).unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateApplication));

    // Only the publisher may accept.
    let err = engine.accept(task.id, helper, helper).unwrap_err();
    assert!(matches!(err, LedgerError::NotAuthorized));

    // Once in progress, further applications bounce.
    engine.accept(task.id, helper, publisher).unwrap();
    let late = onboard(&store, "ben@example.edu", 0);
    let err = engine.apply(task.id, late).unwrap_err();
    assert!(matches!(err, LedgerError::TaskNotOpen));
}

#[tokio::test]
async fn test_insufficient_funds_blocks_publish() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 30);
    let err = engine.publish(publisher, draft(50)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            balance: 30,
            required: 50
        }
    ));
    assert_eq!(store.user(publisher).unwrap().points, 30);
}

#[tokio::test]
async fn test_concurrent_accepts_pick_exactly_one() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 100);
    let (task, _) = engine.publish(publisher, draft(50)).await.unwrap();

    let applicants: Vec<UserId> = (0..8)
        .map(|i| onboard(&store, &format!("u{i}@example.edu"), 0))
        .collect();
    for &a in &applicants {
        engine.apply(task.id, a).unwrap();
    }

    let handles: Vec<_> = applicants
        .iter()
        .map(|&a| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.accept_application(task.id, a, publisher, Utc::now()))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            r.as_ref().unwrap_err(),
            LedgerError::AlreadyAccepted
        ));
    }

    let task = store.task(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.accepted_user_id.is_some());
}

#[tokio::test]
async fn test_settlement_happens_exactly_once() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 100);
    let helper = onboard(&store, "ana@example.edu", 0);
    let (task, _) = engine.publish(publisher, draft(50)).await.unwrap();
    engine.apply(task.id, helper).unwrap();
    engine.accept(task.id, helper, publisher).unwrap();

    engine.confirm_completion(task.id, publisher).unwrap();

    // A sweep arriving after confirmation finds nothing to settle; a direct
    // second settle reports the terminal state.
    assert_eq!(engine.expiry_sweep(Utc::now() + Duration::days(10)).unwrap(), 0);
    let err = store.settle(task.id, Some(publisher), Utc::now()).unwrap_err();
    assert!(matches!(err, LedgerError::NotInProgress));

    assert_eq!(store.user(helper).unwrap().points, 50);
    assert_eq!(store.user(helper).unwrap().completed_tasks, 1);
}

#[tokio::test]
async fn test_sweep_settles_only_past_grace() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 200);
    let h1 = onboard(&store, "ana@example.edu", 0);
    let h2 = onboard(&store, "ben@example.edu", 0);

    let (stale, _) = engine.publish(publisher, draft(50)).await.unwrap();
    engine.apply(stale.id, h1).unwrap();
    engine.accept(stale.id, h1, publisher).unwrap();

    let (fresh, _) = engine.publish(publisher, draft(40)).await.unwrap();
    engine.apply(fresh.id, h2).unwrap();
    engine.accept(fresh.id, h2, publisher).unwrap();

    // Both were accepted now, so a sweep six days later settles both.
    assert_eq!(engine.expiry_sweep(Utc::now() + Duration::days(6)).unwrap(), 2);
    assert_eq!(store.user(h1).unwrap().points, 50);
    assert_eq!(store.user(h2).unwrap().points, 40);

    // Within grace, nothing moves.
    let (t3, _) = engine.publish(publisher, draft(20)).await.unwrap();
    engine.apply(t3.id, h1).unwrap();
    engine.accept(t3.id, h1, publisher).unwrap();
    assert_eq!(engine.expiry_sweep(Utc::now() + Duration::days(2)).unwrap(), 0);
    assert_eq!(store.task(t3.id).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_reviews_flow_both_directions() {
    let (store, engine) = setup();
    let publisher = onboard(&store, "pat@example.edu", 100);
    let helper = onboard(&store, "ana@example.edu", 0);
    let (task, _) = engine.publish(publisher, draft(50)).await.unwrap();
    engine.apply(task.id, helper).unwrap();
    engine.accept(task.id, helper, publisher).unwrap();
    engine.confirm_completion(task.id, publisher).unwrap();

    let err = engine
        .submit_review(task.id, publisher, 4.3, None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRating));

    let r1 = engine
        .submit_review(task.id, publisher, 4.5, Some("quick and careful".into()))
        .unwrap();
    assert_eq!(r1.reviewee_id, helper);

    let r2 = engine.submit_review(task.id, helper, 5.0, None).unwrap();
    assert_eq!(r2.reviewee_id, publisher);

    assert_eq!(store.user(helper).unwrap().avg_rating, 4.5);
    assert_eq!(store.reviews_for_user(publisher).unwrap().len(), 1);
}

#[test]
fn test_ledger_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let id = {
        let store = LedgerStore::open(&path).unwrap();
        onboard(&store, "pat@example.edu", 100)
    };

    let store = LedgerStore::open(&path).unwrap();
    let user = store.user(id).unwrap();
    assert_eq!(user.email, "pat@example.edu");
    assert_eq!(user.points, 100);
}
