//! Check-in ledger tests.
//!
//! Run with: `cargo test --test check_in_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{desk, event, harness, workshop};
use shackles_registration::types::{
    EventCategory, ParticipantCode, PaymentStatus, RegistrationPlan,
};
use shackles_registration::{CheckInError, CheckInOutcome};
use std::sync::Arc;

#[tokio::test]
async fn repeated_check_in_returns_the_open_record() {
    let h = harness();
    let asha = h.verified("Asha", "general").await;
    let code = asha.code.clone().unwrap();
    let keynote = event(EventCategory::Technical);

    let first = h.app.check_in.check_in(&code, keynote, desk()).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(3));
    let second = h.app.check_in.check_in(&code, keynote, desk()).await.unwrap();

    let CheckInOutcome::CheckedIn(record) = &first else {
        unreachable!("first scan must create a record");
    };
    assert_eq!(second, CheckInOutcome::AlreadyCheckedIn(record.clone()));
    assert_eq!(record.checked_in_by, desk());
    assert_eq!(record.target, keynote);

    let history = h.app.queries.attendance_for(asha.key).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(h.app.queries.currently_checked_in(&keynote).await.unwrap(), 1);
}

#[tokio::test]
async fn different_targets_are_separate_visits() {
    let h = harness();
    let both = h.verified("Chen", "both").await;
    let code = both.code.clone().unwrap();

    h.app.check_in.check_in(&code, workshop(), desk()).await.unwrap();
    h.clock.advance(chrono::Duration::hours(2));
    h.app
        .check_in
        .check_in(&code, event(EventCategory::NonTechnical), desk())
        .await
        .unwrap();

    let history = h.app.queries.attendance_for(both.key).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].check_in_time < history[1].check_in_time);
    assert!(history.iter().all(|record| record.is_open()));
}

#[tokio::test]
async fn re_entry_after_check_out_creates_a_new_record() {
    let h = harness();
    let asha = h.verified("Asha", "general").await;
    let code = asha.code.clone().unwrap();
    let quiz = event(EventCategory::NonTechnical);

    let first = h.app.check_in.check_in(&code, quiz, desk()).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(40));
    let left_at = first.record().check_in_time + chrono::Duration::minutes(40);
    h.store.check_out(asha.key, &quiz.key(), left_at);
    assert_eq!(h.app.queries.currently_checked_in(&quiz).await.unwrap(), 0);

    let again = h.app.check_in.check_in(&code, quiz, desk()).await.unwrap();

    assert_eq!(again.label(), "checked_in");
    assert_ne!(again.record().id, first.record().id);
    assert_eq!(h.app.queries.attendance_for(asha.key).await.unwrap().len(), 2);
}

#[tokio::test]
async fn plan_mismatch_writes_nothing() {
    let h = harness();
    let ben = h.verified("Ben", "workshop").await;

    let err = h
        .app
        .check_in
        .check_in(ben.code.as_ref().unwrap(), event(EventCategory::Technical), desk())
        .await
        .unwrap_err();

    let CheckInError::AccessDenied(denial) = err else {
        unreachable!("expected an access denial, got {err:?}");
    };
    assert_eq!(denial.required_plans, vec![RegistrationPlan::General, RegistrationPlan::Both]);
    assert!(h.app.queries.attendance_for(ben.key).await.unwrap().is_empty());
}

#[tokio::test]
async fn unverified_payment_cannot_check_in() {
    let h = harness();
    let pending = h.register("Dev", "both").await;

    let err = h
        .app
        .check_in
        .check_in_participant(Some(pending.clone()), workshop(), desk())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CheckInError::PaymentNotVerified {
            status: PaymentStatus::Pending
        }
    );
    assert!(h.app.queries.attendance_for(pending.key).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let h = harness();
    let code = ParticipantCode::new(RegistrationPlan::General, 42).unwrap();

    assert_eq!(
        h.app
            .check_in
            .check_in(&code, event(EventCategory::Special), desk())
            .await
            .unwrap_err(),
        CheckInError::ParticipantNotFound
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_scans_create_one_record() {
    let h = Arc::new(harness());
    let asha = h.verified("Asha", "both").await;
    let code = asha.code.clone().unwrap();
    let keynote = event(EventCategory::Technical);

    let scans = (0..6).map(|_| {
        let h = Arc::clone(&h);
        let code = code.clone();
        tokio::spawn(async move { h.app.check_in.check_in(&code, keynote, desk()).await })
    });
    let outcomes: Vec<CheckInOutcome> = futures::future::join_all(scans)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CheckInOutcome::CheckedIn(_)))
        .count();
    assert_eq!(created, 1);
    let id = outcomes[0].record().id;
    assert!(outcomes.iter().all(|outcome| outcome.record().id == id));
    assert_eq!(h.app.queries.attendance_for(asha.key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn occupancy_counts_open_visits_per_target() {
    let h = harness();
    let keynote = event(EventCategory::Technical);
    let lab = workshop();

    for (name, plan) in [("Asha", "general"), ("Chen", "both"), ("Dev", "both")] {
        let participant = h.verified(name, plan).await;
        h.app
            .check_in
            .check_in(participant.code.as_ref().unwrap(), keynote, desk())
            .await
            .unwrap();
    }
    let ben = h.verified("Ben", "workshop").await;
    h.app
        .check_in
        .check_in(ben.code.as_ref().unwrap(), lab, desk())
        .await
        .unwrap();

    assert_eq!(h.app.queries.currently_checked_in(&keynote).await.unwrap(), 3);
    assert_eq!(h.app.queries.currently_checked_in(&lab).await.unwrap(), 1);
}
