//! Integration tests for debounced view-state persistence

mod helpers;

use helpers::{FakeBackend, PLAYLIST, USER};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tunetrees_practice::session_state::{
    SessionState, SessionStateCache, SessionStateKey, SessionStatePatch, SessionStateTiming,
    SortingRule, StateScope, ViewPurpose,
};

fn practice_key() -> SessionStateKey {
    SessionStateKey {
        user_id: USER,
        purpose: ViewPurpose::Practice,
        playlist_id: PLAYLIST,
    }
}

fn setup() -> (Arc<FakeBackend>, SessionStateCache) {
    let backend = FakeBackend::new(Vec::new());
    let cache = SessionStateCache::new(
        backend.clone(),
        StateScope::Full,
        SessionStateTiming::default(),
    );
    (backend, cache)
}

fn filter(text: &str) -> SessionStatePatch {
    SessionStatePatch {
        global_filter: Some(text.to_string()),
        ..Default::default()
    }
}

fn sort_by(column: &str) -> SessionStatePatch {
    SessionStatePatch {
        sorting: Some(vec![SortingRule {
            id: column.to_string(),
            desc: false,
        }]),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_writes_once() {
    let (backend, cache) = setup();
    let key = practice_key();

    cache.record_change(key, filter("r"));
    sleep(Duration::from_millis(100)).await;
    cache.record_change(key, filter("re"));
    sleep(Duration::from_millis(100)).await;
    cache.record_change(key, filter("reel"));
    assert_eq!(backend.persists(), 0);
    assert!(cache.has_pending(key));

    sleep(Duration::from_millis(300)).await;

    assert_eq!(backend.persists(), 1);
    assert_eq!(backend.persisted_states()[0].global_filter, "reel");
    assert!(!cache.has_pending(key));
}

#[tokio::test(start_paused = true)]
async fn test_visibility_hidden_flushes_immediately() {
    let (backend, cache) = setup();
    let key = practice_key();

    cache.record_change(key, sort_by("title"));
    cache.on_visibility_hidden().await;

    assert_eq!(backend.persists(), 1);
    assert_eq!(backend.persisted_states()[0].sorting[0].id, "title");

    // The armed timer finds nothing left to write
    sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.persists(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deferred_flush_restarts_debounce() {
    let (backend, cache) = setup();
    let key = practice_key();

    cache.record_change(key, filter("jig"));
    sleep(Duration::from_millis(200)).await;
    cache.flush(key, false).await;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.persists(), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.persists(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scroll_ignored_during_restore_grace() {
    let (backend, cache) = setup();
    let key = practice_key();

    cache.restore(key).await;
    cache.record_change(key, SessionStatePatch::scroll(120));
    assert!(!cache.has_pending(key));

    // Other fields in the same patch still apply
    cache.record_change(
        key,
        SessionStatePatch {
            global_filter: Some("polka".to_string()),
            scroll_top: Some(50),
            ..Default::default()
        },
    );
    let during = cache.peek(key).unwrap();
    assert_eq!(during.scroll_top, 0);
    assert_eq!(during.global_filter, "polka");

    sleep(Duration::from_millis(600)).await;
    cache.record_change(key, SessionStatePatch::scroll(240));
    cache.flush(key, true).await;

    let last = backend.persisted_states().pop().unwrap();
    assert_eq!(last.scroll_top, 240);
    assert_eq!(last.global_filter, "polka");
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_state_is_not_rewritten() {
    let (backend, cache) = setup();
    let key = practice_key();
    let stored = SessionState {
        global_filter: "hornpipe".to_string(),
        scroll_top: 30,
        ..Default::default()
    };
    backend.state().stored_states.insert(
        (USER, StateScope::Full, ViewPurpose::Practice, PLAYLIST),
        stored.clone(),
    );

    assert_eq!(cache.load(key).await, stored);

    cache.record_change(key, filter("hornpipe"));
    assert!(!cache.has_pending(key));

    // Changed and changed back before the timer fires
    cache.record_change(key, filter("slide"));
    cache.record_change(key, filter("hornpipe"));
    sleep(Duration::from_millis(500)).await;

    assert_eq!(backend.persists(), 0);
    assert!(!cache.has_pending(key));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_retried_on_teardown() {
    let (backend, cache) = setup();
    let key = practice_key();
    backend.state().fail_persist = true;

    cache.record_change(key, filter("waltz"));
    cache.flush(key, true).await;

    assert_eq!(backend.persists(), 1);
    assert!(backend.persisted_states().is_empty());
    assert!(cache.has_pending(key));

    backend.state().fail_persist = false;
    cache.teardown().await;

    assert_eq!(backend.persists(), 2);
    assert_eq!(backend.persisted_states()[0].global_filter, "waltz");
    assert!(!cache.has_pending(key));
}

#[tokio::test]
async fn test_views_are_independent() {
    let (backend, cache) = setup();
    let practice = practice_key();
    let repertoire = SessionStateKey {
        purpose: ViewPurpose::Repertoire,
        ..practice
    };

    cache.record_change(practice, filter("reel"));
    cache.record_change(repertoire, sort_by("type"));
    cache.flush_all().await;

    assert_eq!(backend.persists(), 2);
    let state = backend.state();
    let stored = &state.stored_states;
    let practice_state = &stored[&(USER, StateScope::Full, ViewPurpose::Practice, PLAYLIST)];
    let repertoire_state = &stored[&(USER, StateScope::Full, ViewPurpose::Repertoire, PLAYLIST)];
    assert_eq!(practice_state.global_filter, "reel");
    assert!(practice_state.sorting.is_empty());
    assert_eq!(repertoire_state.sorting[0].id, "type");
}

#[tokio::test]
async fn test_clear_transient_data_forgets_view() {
    let (backend, cache) = setup();
    let key = practice_key();

    cache.record_change(key, filter("set dance"));
    cache.flush(key, true).await;
    assert_eq!(backend.state().stored_states.len(), 1);

    cache.clear_transient_data(key).await;
    assert!(cache.peek(key).is_none());
    assert!(backend.state().stored_states.is_empty());
    assert_eq!(cache.load(key).await, SessionState::default());
}

#[tokio::test(start_paused = true)]
async fn test_writes_for_one_view_never_overlap() {
    let (backend, cache) = setup();
    let key = practice_key();
    backend.state().persist_delay = Duration::from_millis(100);

    cache.record_change(key, filter("first"));
    let background = cache.clone();
    let first = tokio::spawn(async move { background.flush(key, true).await });
    sleep(Duration::from_millis(10)).await;

    cache.record_change(key, filter("second"));
    cache.flush(key, true).await;
    first.await.unwrap();

    assert_eq!(backend.max_persists_in_flight.load(Ordering::SeqCst), 1);
    let filters: Vec<String> = backend
        .persisted_states()
        .into_iter()
        .map(|s| s.global_filter)
        .collect();
    assert_eq!(filters, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_change_before_load_keeps_stored_state() {
    let (backend, cache) = setup();
    let key = practice_key();
    backend.state().stored_states.insert(
        (USER, StateScope::Full, ViewPurpose::Practice, PLAYLIST),
        SessionState {
            sorting: vec![SortingRule {
                id: "title".to_string(),
                desc: true,
            }],
            global_filter: "reel".to_string(),
            ..Default::default()
        },
    );

    // First contact after a restart is a scroll save
    cache.record_change(key, SessionStatePatch::scroll(300));
    cache.flush(key, true).await;

    let written = backend.persisted_states().pop().unwrap();
    assert_eq!(written.scroll_top, 300);
    assert_eq!(written.global_filter, "reel");
    assert_eq!(written.sorting[0].id, "title");
    assert!(written.sorting[0].desc);
    assert_eq!(cache.load(key).await, written);
}

#[tokio::test]
async fn test_change_back_to_default_before_load_is_written() {
    let (backend, cache) = setup();
    let key = practice_key();
    backend.state().stored_states.insert(
        (USER, StateScope::Full, ViewPurpose::Practice, PLAYLIST),
        SessionState {
            scroll_top: 90,
            ..Default::default()
        },
    );

    cache.record_change(key, SessionStatePatch::scroll(0));
    assert!(cache.has_pending(key));
    cache.flush(key, true).await;

    assert_eq!(backend.persists(), 1);
    assert_eq!(backend.persisted_states()[0].scroll_top, 0);
}

#[tokio::test]
async fn test_write_waits_until_stored_state_is_readable() {
    let (backend, cache) = setup();
    let key = practice_key();
    backend.state().stored_states.insert(
        (USER, StateScope::Full, ViewPurpose::Practice, PLAYLIST),
        SessionState {
            global_filter: "slip jig".to_string(),
            ..Default::default()
        },
    );
    backend.state().fail_load_state = true;

    cache.record_change(key, SessionStatePatch::scroll(75));
    cache.flush(key, true).await;
    assert_eq!(backend.persists(), 0);
    assert!(cache.has_pending(key));

    backend.state().fail_load_state = false;
    cache.teardown().await;

    let written = backend.persisted_states().pop().unwrap();
    assert_eq!(written.global_filter, "slip jig");
    assert_eq!(written.scroll_top, 75);
}
