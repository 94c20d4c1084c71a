//! Queue snapshot cache
//!
//! Holds the most recent unfiltered practice-queue snapshot and mediates
//! every change to it.
//!
//! - Concurrent fetches for the same key share one backend call; every
//!   caller receives the same `Arc<QueueSnapshot>`.
//! - A fetch whose key matches the last completed fetch is answered from
//!   the cache without touching the backend.
//! - Fetch failures keep the previous snapshot and emit
//!   `SnapshotFetchFailed`.
//! - Local edits replace the snapshot copy-on-write; readers holding an
//!   older `Arc` never observe a partial update.

use crate::backend::{bounded, AddItemsOutcome, PracticeBackend};
use crate::model::{
    sort_for_display, EvaluationState, QueueEntry, QueueMetrics, QueueSnapshot, SnapshotKey,
};
use crate::{Error, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use tunetrees_common::events::{EventBus, PracticeEvent};

type FetchOutcome = std::result::Result<Arc<QueueSnapshot>, Arc<Error>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Default)]
struct CacheState {
    current: Option<Arc<QueueSnapshot>>,
    /// Key of the most recently completed successful fetch
    last_key: Option<SnapshotKey>,
    in_flight: HashMap<SnapshotKey, SharedFetch>,
    last_error: Option<String>,
    /// Fetches are numbered in start order; a result older than the one
    /// already installed is returned to its callers but not cached.
    started_fetches: u64,
    installed_fetch: u64,
}

pub struct QueueSnapshotCache {
    backend: Arc<dyn PracticeBackend>,
    events: EventBus,
    delinquency_window_days: i64,
    request_timeout: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl QueueSnapshotCache {
    pub fn new(
        backend: Arc<dyn PracticeBackend>,
        events: EventBus,
        delinquency_window_days: i64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            delinquency_window_days,
            request_timeout,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn delinquency_window_days(&self) -> i64 {
        self.delinquency_window_days
    }

    /// Fetch the snapshot for `key`, reusing the cached or in-flight result
    /// when possible.
    pub async fn fetch_snapshot(&self, key: SnapshotKey) -> Result<Arc<QueueSnapshot>> {
        let pending = {
            let mut state = lock(&self.state);
            if state.last_key == Some(key) {
                if let Some(current) = &state.current {
                    debug!(playlist_id = key.playlist_id, "Snapshot key unchanged, skipping fetch");
                    return Ok(Arc::clone(current));
                }
            }
            self.attach_or_start(&mut state, key, false)
        };

        pending.await.map_err(|e| Error::Fetch(e.to_string()))
    }

    /// Fetch again even if the key matches the cached snapshot.
    ///
    /// A fetch already in flight for the key is joined rather than
    /// duplicated.
    pub async fn refresh(&self, key: SnapshotKey, force_regenerate: bool) -> Result<Arc<QueueSnapshot>> {
        let pending = {
            let mut state = lock(&self.state);
            self.attach_or_start(&mut state, key, force_regenerate)
        };

        pending.await.map_err(|e| Error::Fetch(e.to_string()))
    }

    fn attach_or_start(
        &self,
        state: &mut CacheState,
        key: SnapshotKey,
        force_regenerate: bool,
    ) -> SharedFetch {
        if let Some(existing) = state.in_flight.get(&key) {
            debug!(playlist_id = key.playlist_id, "Joining in-flight snapshot fetch");
            return existing.clone();
        }

        let backend = Arc::clone(&self.backend);
        let shared_state = Arc::clone(&self.state);
        let events = self.events.clone();
        let window = self.delinquency_window_days;
        let limit = self.request_timeout;
        state.started_fetches += 1;
        let fetch_id = state.started_fetches;

        let fetch = async move {
            let result = bounded(
                limit,
                backend.fetch_queue_snapshot(
                    key.user_id,
                    key.playlist_id,
                    key.sitdown_date,
                    force_regenerate,
                ),
            )
            .await;

            let mut state = lock(&shared_state);
            state.in_flight.remove(&key);
            let superseded = fetch_id < state.installed_fetch;

            match result {
                Ok(entries) => {
                    let previous = state.current.clone();
                    let snapshot = Arc::new(build_snapshot(key, window, entries, previous.as_deref()));
                    if superseded {
                        debug!(
                            playlist_id = key.playlist_id,
                            fetch_id,
                            "Newer snapshot already installed, not caching this one"
                        );
                        return Ok(snapshot);
                    }
                    state.installed_fetch = fetch_id;
                    state.current = Some(Arc::clone(&snapshot));
                    state.last_key = Some(key);
                    state.last_error = None;
                    info!(
                        user_id = key.user_id,
                        playlist_id = key.playlist_id,
                        entries = snapshot.entries.len(),
                        "Queue snapshot refreshed"
                    );
                    events.emit_lossy(PracticeEvent::SnapshotRefreshed {
                        user_id: key.user_id,
                        playlist_id: key.playlist_id,
                        entry_count: snapshot.entries.len(),
                        timestamp: Utc::now(),
                    });
                    Ok(snapshot)
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        user_id = key.user_id,
                        playlist_id = key.playlist_id,
                        "Snapshot fetch failed, keeping previous snapshot: {}",
                        message
                    );
                    if !superseded {
                        state.last_error = Some(message.clone());
                    }
                    events.emit_lossy(PracticeEvent::SnapshotFetchFailed {
                        user_id: key.user_id,
                        playlist_id: key.playlist_id,
                        message,
                        timestamp: Utc::now(),
                    });
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(key, fetch.clone());
        fetch
    }

    /// Most recent snapshot, if any fetch has succeeded
    pub fn current(&self) -> Option<Arc<QueueSnapshot>> {
        lock(&self.state).current.clone()
    }

    /// Message of the last failed fetch, cleared by the next success
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    pub fn entry(&self, item_id: i64) -> Option<QueueEntry> {
        lock(&self.state)
            .current
            .as_ref()
            .and_then(|s| s.entry(item_id).cloned())
    }

    /// Filtered list for display
    pub fn display_entries(&self, show_completed: bool) -> Vec<QueueEntry> {
        self.current()
            .map(|s| s.display_entries(show_completed))
            .unwrap_or_default()
    }

    /// Metrics over the unfiltered snapshot
    pub fn metrics(&self) -> QueueMetrics {
        self.current().map(|s| s.metrics()).unwrap_or_default()
    }

    /// Replace one entry with an edited copy.
    ///
    /// Returns `(before, after)`, or `None` when the item is not cached.
    pub fn update_entry<F>(&self, item_id: i64, mutate: F) -> Option<(QueueEntry, QueueEntry)>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut state = lock(&self.state);
        let current = state.current.as_ref()?;
        let index = current.entries.iter().position(|e| e.item_id == item_id)?;

        let mut next = QueueSnapshot::clone(current);
        let before = next.entries[index].clone();
        mutate(&mut next.entries[index]);
        next.entries[index].annotate(next.key.sitdown_date, next.delinquency_window_days);
        let after = next.entries[index].clone();

        state.current = Some(Arc::new(next));
        Some((before, after))
    }

    /// Merge entries by `item_id`: known items are replaced, new ones
    /// appended, then the queue is re-sorted so due items lead.
    ///
    /// Returns the ids that were not previously present.
    pub fn merge_entries(&self, entries: Vec<QueueEntry>) -> Vec<i64> {
        let mut state = lock(&self.state);
        let Some(current) = state.current.as_ref() else {
            return Vec::new();
        };

        let mut next = QueueSnapshot::clone(current);
        let mut appended = Vec::new();
        for mut incoming in entries {
            incoming.annotate(next.key.sitdown_date, next.delinquency_window_days);
            match next.entries.iter_mut().find(|e| e.item_id == incoming.item_id) {
                Some(existing) => *existing = incoming,
                None => {
                    appended.push(incoming.item_id);
                    next.entries.push(incoming);
                }
            }
        }
        sort_for_display(&mut next.entries);

        state.current = Some(Arc::new(next));
        appended
    }

    /// Pull up to `count` backlog items into the cached queue
    pub async fn refill(&self, count: u32) -> Result<Vec<QueueEntry>> {
        let key = self.require_key()?;
        let added = bounded(
            self.request_timeout,
            self.backend
                .refill_queue(key.user_id, key.playlist_id, key.sitdown_date, count),
        )
        .await
        .map_err(|e| {
            warn!(playlist_id = key.playlist_id, "Queue refill failed: {}", e);
            e
        })?;

        let appended = self.merge_entries(added.clone());
        info!(
            playlist_id = key.playlist_id,
            requested = count,
            appended = appended.len(),
            "Queue refilled"
        );
        self.events.emit_lossy(PracticeEvent::QueueRefilled {
            playlist_id: key.playlist_id,
            added: appended,
            timestamp: Utc::now(),
        });
        Ok(added)
    }

    /// Explicitly queue items, then merge their fresh entries
    pub async fn add_items(&self, item_ids: &[i64]) -> Result<AddItemsOutcome> {
        let key = self.require_key()?;
        let outcome = bounded(
            self.request_timeout,
            self.backend
                .add_items_to_queue(key.user_id, key.playlist_id, item_ids, key.sitdown_date),
        )
        .await?;

        if !outcome.added.is_empty() {
            let fresh = self.fetch_backend_entries(key).await?;
            let wanted: Vec<QueueEntry> = fresh
                .into_iter()
                .filter(|e| outcome.added.contains(&e.item_id))
                .collect();
            self.merge_entries(wanted);
        }

        self.events.emit_lossy(PracticeEvent::ItemsAdded {
            playlist_id: key.playlist_id,
            added: outcome.added.clone(),
            skipped: outcome.skipped.clone(),
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }

    /// Read one item's authoritative entry without touching the cache
    pub async fn fetch_backend_entry(&self, item_id: i64) -> Result<Option<QueueEntry>> {
        let key = self.require_key()?;
        let entries = self.fetch_backend_entries(key).await?;
        Ok(entries.into_iter().find(|e| e.item_id == item_id))
    }

    async fn fetch_backend_entries(&self, key: SnapshotKey) -> Result<Vec<QueueEntry>> {
        let mut entries = bounded(
            self.request_timeout,
            self.backend
                .fetch_queue_snapshot(key.user_id, key.playlist_id, key.sitdown_date, false),
        )
        .await?;
        for entry in &mut entries {
            entry.annotate(key.sitdown_date, self.delinquency_window_days);
        }
        Ok(entries)
    }

    fn require_key(&self) -> Result<SnapshotKey> {
        lock(&self.state)
            .current
            .as_ref()
            .map(|s| s.key)
            .ok_or_else(|| Error::InvalidState("No queue snapshot loaded".to_string()))
    }
}

/// Build a snapshot from backend entries.
///
/// Grades that are still waiting on a staging round trip exist only
/// locally; they are carried over so a refresh does not wipe them.
fn build_snapshot(
    key: SnapshotKey,
    window: i64,
    mut entries: Vec<QueueEntry>,
    previous: Option<&QueueSnapshot>,
) -> QueueSnapshot {
    for entry in &mut entries {
        entry.annotate(key.sitdown_date, window);

        let pending_local = previous
            .filter(|p| p.key.playlist_id == key.playlist_id && p.key.user_id == key.user_id)
            .and_then(|p| p.entry(entry.item_id))
            .filter(|old| old.evaluation_state() == EvaluationState::Staging);
        if let Some(old) = pending_local {
            if entry.completed_at.is_none() && !entry.has_staged {
                entry.staged_evaluation = old.staged_evaluation.clone();
            }
        }
    }
    sort_for_display(&mut entries);

    QueueSnapshot {
        key,
        delinquency_window_days: window,
        entries,
        fetched_at: Utc::now(),
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
