//! Integration tests for staged evaluations: optimistic updates, rollback,
//! stale responses and batch submission

mod helpers;

use helpers::{cache_for, committed_fields, entry, key, sitdown, FakeBackend, PLAYLIST};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tunetrees_common::events::{EventBus, PracticeEvent};
use tunetrees_practice::model::EvaluationState;
use tunetrees_practice::review::{ReviewOutcome, StagedReviewCoordinator};
use tunetrees_practice::snapshot::QueueSnapshotCache;
use tunetrees_practice::Error;

struct Fixture {
    backend: Arc<FakeBackend>,
    cache: Arc<QueueSnapshotCache>,
    coordinator: Arc<StagedReviewCoordinator>,
    events: Receiver<PracticeEvent>,
}

async fn fixture() -> Fixture {
    let backend = FakeBackend::new(vec![
        entry(1, Some("2024-06-01")),
        entry(2, Some("2024-06-09")),
        entry(3, Some("2020-01-01")),
    ]);
    let bus = EventBus::default();
    let events = bus.subscribe();
    let cache = cache_for(&backend, &bus);
    cache.fetch_snapshot(key(false)).await.unwrap();

    let coordinator = Arc::new(StagedReviewCoordinator::new(
        PLAYLIST,
        sitdown(),
        Arc::clone(&cache),
        backend.clone(),
        bus,
        Duration::from_secs(10),
    ));

    Fixture {
        backend,
        cache,
        coordinator,
        events,
    }
}

fn drain(rx: &mut Receiver<PracticeEvent>) -> Vec<PracticeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn state_of(f: &Fixture, item_id: i64) -> EvaluationState {
    f.cache.entry(item_id).unwrap().evaluation_state()
}

#[tokio::test]
async fn test_stage_confirms_and_merges_projection() {
    let mut f = fixture().await;

    let outcome = f.coordinator.stage(2, "good").await.unwrap();
    assert_eq!(outcome, ReviewOutcome::Staged);

    let staged = f.cache.entry(2).unwrap();
    assert_eq!(staged.evaluation_state(), EvaluationState::Staged);
    assert_eq!(staged.staged_evaluation.as_deref(), Some("good"));
    assert_eq!(staged.scheduling.repetitions, Some(3));
    assert_eq!(staged.scheduling.interval, Some(10));

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PracticeEvent::EvaluationStaged { item_id: 2, grade, .. } if grade == "good"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_grade_visible_before_response() {
    let f = fixture().await;
    f.backend.state().stage_delays.push_back(Duration::from_millis(100));

    let handle = f.coordinator.stage_in_background(2, "good".to_string());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let pending = f.cache.entry(2).unwrap();
    assert_eq!(pending.evaluation_state(), EvaluationState::Staging);
    assert_eq!(pending.staged_evaluation.as_deref(), Some("good"));

    assert_eq!(handle.await.unwrap().unwrap(), ReviewOutcome::Staged);
    assert_eq!(state_of(&f, 2), EvaluationState::Staged);
}

#[tokio::test]
async fn test_restaging_same_grade_is_noop() {
    let f = fixture().await;

    f.coordinator.stage(2, "good").await.unwrap();
    let again = f.coordinator.stage(2, "Good").await.unwrap();

    assert_eq!(again, ReviewOutcome::Unchanged);
    assert_eq!(f.backend.stages(), 1);
}

#[tokio::test]
async fn test_staging_failure_rolls_back() {
    let mut f = fixture().await;
    f.backend.state().fail_stage = true;

    let result = f.coordinator.stage(2, "easy").await;
    assert!(matches!(result, Err(Error::Staging(_))));

    let rolled_back = f.cache.entry(2).unwrap();
    assert_eq!(rolled_back.evaluation_state(), EvaluationState::Unevaluated);
    assert_eq!(rolled_back.scheduling, committed_fields());

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PracticeEvent::EvaluationStagingFailed { item_id: 2, .. })));
}

#[tokio::test]
async fn test_rejected_grade_rolls_back() {
    let f = fixture().await;
    f.backend.state().reject_stage = true;

    assert!(matches!(
        f.coordinator.stage(1, "hard").await,
        Err(Error::Staging(_))
    ));
    assert_eq!(state_of(&f, 1), EvaluationState::Unevaluated);
}

#[tokio::test]
async fn test_invalid_grade_changes_nothing() {
    let f = fixture().await;

    assert!(matches!(
        f.coordinator.stage(2, "meh").await,
        Err(Error::InvalidGrade(_))
    ));
    assert!(matches!(
        f.coordinator.stage(99, "good").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(f.backend.stages(), 0);
    assert_eq!(state_of(&f, 2), EvaluationState::Unevaluated);
}

#[tokio::test]
async fn test_clear_restores_committed_values() {
    let mut f = fixture().await;

    f.coordinator.stage(2, "again").await.unwrap();
    assert_eq!(f.cache.entry(2).unwrap().scheduling.repetitions, Some(0));

    let outcome = f.coordinator.clear(2).await.unwrap();
    assert_eq!(outcome, ReviewOutcome::Cleared);

    let cleared = f.cache.entry(2).unwrap();
    assert_eq!(cleared.evaluation_state(), EvaluationState::Unevaluated);
    assert_eq!(cleared.scheduling, committed_fields());
    assert_eq!(f.backend.state().discard_log, vec![2]);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PracticeEvent::EvaluationCleared { item_id: 2, .. })));

    // Nothing left to clear
    assert_eq!(f.coordinator.clear(2).await.unwrap(), ReviewOutcome::Unchanged);
}

#[tokio::test]
async fn test_blank_grade_clears() {
    let f = fixture().await;

    f.coordinator.stage(3, "hard").await.unwrap();
    let outcome = f.coordinator.stage(3, "  ").await.unwrap();

    assert_eq!(outcome, ReviewOutcome::Cleared);
    assert_eq!(state_of(&f, 3), EvaluationState::Unevaluated);
}

#[tokio::test]
async fn test_clear_failure_keeps_staged_grade() {
    let mut f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();
    let staged = f.cache.entry(2).unwrap();
    f.backend.state().fail_discard = true;

    assert!(matches!(f.coordinator.clear(2).await, Err(Error::Staging(_))));

    let restored = f.cache.entry(2).unwrap();
    assert_eq!(restored.evaluation_state(), EvaluationState::Staged);
    assert_eq!(restored.staged_evaluation.as_deref(), Some("good"));
    assert_eq!(restored.scheduling, staged.scheduling);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PracticeEvent::EvaluationClearFailed { item_id: 2, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_late_response_for_older_grade_is_ignored() {
    let f = fixture().await;
    {
        let mut state = f.backend.state();
        state.stage_delays.push_back(Duration::from_millis(100));
        state.stage_delays.push_back(Duration::from_millis(10));
    }

    let first = f.coordinator.stage_in_background(2, "again".to_string());
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = f.coordinator.stage_in_background(2, "easy".to_string());

    assert_eq!(first.await.unwrap().unwrap(), ReviewOutcome::Superseded);
    assert_eq!(second.await.unwrap().unwrap(), ReviewOutcome::Staged);

    let latest = f.cache.entry(2).unwrap();
    assert_eq!(latest.staged_evaluation.as_deref(), Some("easy"));
    assert_eq!(latest.evaluation_state(), EvaluationState::Staged);
    assert_eq!(latest.scheduling.repetitions, Some(3));

    // Requests reached the backend in issue order
    assert_eq!(
        f.backend.state().stage_log,
        vec![(2, "again".to_string()), (2, "easy".to_string())]
    );
}

#[tokio::test]
async fn test_submit_commits_staged_items() {
    let mut f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();
    f.coordinator.stage(1, "hard").await.unwrap();

    let outcome = f.coordinator.submit().await.unwrap();
    assert_eq!(outcome.submitted, vec![1, 2]);
    assert!(outcome.unconfirmed.is_empty());

    let remaining: Vec<i64> = f
        .cache
        .display_entries(false)
        .iter()
        .map(|e| e.item_id)
        .collect();
    assert_eq!(remaining, vec![3]);
    assert_eq!(state_of(&f, 2), EvaluationState::Committed);

    let metrics = f.cache.metrics();
    assert_eq!(metrics.submitted, 2);
    assert_eq!(metrics.staged, 0);

    {
        let backend = f.backend.state();
        let batch = &backend.submissions[0];
        assert_eq!(batch[&2].grade, "good");
        assert_eq!(batch[&1].grade, "hard");
        assert_eq!(batch[&1].goal.as_deref(), Some("recall"));
    }

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PracticeEvent::EvaluationsSubmitted { item_ids, .. } if item_ids == &vec![1, 2]
    )));

    // Committed items are read-only
    assert!(matches!(
        f.coordinator.stage(2, "easy").await,
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(f.coordinator.clear(1).await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_submit_failure_leaves_everything_staged() {
    let mut f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();
    f.coordinator.stage(3, "easy").await.unwrap();
    f.backend.state().fail_submit = true;

    assert!(matches!(f.coordinator.submit().await, Err(Error::Submit(_))));
    assert_eq!(state_of(&f, 2), EvaluationState::Staged);
    assert_eq!(state_of(&f, 3), EvaluationState::Staged);
    assert_eq!(f.cache.display_entries(false).len(), 3);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PracticeEvent::SubmissionFailed { .. })));

    // A retry goes through once the backend recovers
    f.backend.state().fail_submit = false;
    assert_eq!(f.coordinator.submit().await.unwrap().submitted, vec![2, 3]);
}

#[tokio::test]
async fn test_submit_with_nothing_staged_skips_backend() {
    let f = fixture().await;

    let outcome = f.coordinator.submit().await.unwrap();
    assert!(outcome.submitted.is_empty());
    assert_eq!(
        f.backend
            .submit_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_submit_reports_unconfirmed_grades() {
    let f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();

    f.backend.state().stage_delays.push_back(Duration::from_millis(100));
    let pending = f.coordinator.stage_in_background(1, "hard".to_string());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = f.coordinator.submit().await.unwrap();
    assert_eq!(outcome.submitted, vec![2]);
    assert_eq!(outcome.unconfirmed, vec![1]);

    assert_eq!(pending.await.unwrap().unwrap(), ReviewOutcome::Staged);
    assert_eq!(state_of(&f, 1), EvaluationState::Staged);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submit_is_rejected() {
    let f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();
    f.backend.state().submit_delay = Duration::from_millis(50);

    let (a, b) = tokio::join!(f.coordinator.submit(), f.coordinator.submit());
    assert!(a.is_ok());
    assert!(matches!(b, Err(Error::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_regrade_during_submit_is_rejected() {
    let f = fixture().await;
    f.coordinator.stage(2, "good").await.unwrap();
    f.coordinator.stage(1, "hard").await.unwrap();
    f.backend.state().submit_delay = Duration::from_millis(100);

    let submitting = Arc::clone(&f.coordinator);
    let submit = tokio::spawn(async move { submitting.submit().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let regrade = f.coordinator.stage(2, "easy").await;
    assert!(matches!(regrade, Err(Error::InvalidState(_))));
    let clear = f.coordinator.clear(1).await;
    assert!(matches!(clear, Err(Error::InvalidState(_))));

    let outcome = submit.await.unwrap().unwrap();
    assert_eq!(outcome.submitted, vec![1, 2]);
    assert_eq!(state_of(&f, 2), EvaluationState::Committed);
    assert_eq!(f.cache.entry(2).unwrap().staged_evaluation.as_deref(), Some("good"));
    // No tentative grade was sent after the batch was taken
    assert!(f.backend.state().stage_log.iter().all(|(_, grade)| grade != "easy"));
    assert!(f.backend.state().discard_log.is_empty());

    // Once the batch is done, other items take grades again
    assert_eq!(f.coordinator.stage(3, "good").await.unwrap(), ReviewOutcome::Staged);
}
