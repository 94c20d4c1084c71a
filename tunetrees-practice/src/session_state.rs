//! Per-view session state with debounced persistence
//!
//! View state (sorting, filters, column visibility, row selection, scroll
//! offset) is held in memory per `(user, purpose, playlist)` and written to
//! the backend through a write-coalescing queue:
//!
//! - every change bumps a per-key generation and arms a debounce timer;
//!   a timer only writes if its generation is still the latest
//! - `flush(key, true)` writes immediately, so nothing pending is lost on
//!   visibility loss or teardown
//! - writes for one key are serialized behind a per-key async lock
//! - write failures are logged and never returned to the caller

use crate::backend::{bounded, PracticeBackend};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which table view the state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPurpose {
    Practice,
    Repertoire,
    Catalog,
}

impl ViewPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewPurpose::Practice => "practice",
            ViewPurpose::Repertoire => "repertoire",
            ViewPurpose::Catalog => "catalog",
        }
    }
}

impl fmt::Display for ViewPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewPurpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "practice" => Ok(ViewPurpose::Practice),
            "repertoire" => Ok(ViewPurpose::Repertoire),
            "catalog" => Ok(ViewPurpose::Catalog),
            other => Err(Error::BadRequest(format!("Unknown view purpose: {}", other))),
        }
    }
}

/// Layout class the state was captured under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateScope {
    Full,
    Small,
}

impl StateScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StateScope::Full => "full",
            StateScope::Small => "small",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionStateKey {
    pub user_id: i64,
    pub purpose: ViewPurpose,
    pub playlist_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingRule {
    pub id: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    pub value: serde_json::Value,
}

/// Persisted table state for one view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    pub sorting: Vec<SortingRule>,
    pub column_filters: Vec<ColumnFilter>,
    pub column_visibility: BTreeMap<String, bool>,
    pub row_selection: BTreeMap<String, bool>,
    pub global_filter: String,
    pub scroll_top: u32,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionStatePatch {
    pub sorting: Option<Vec<SortingRule>>,
    pub column_filters: Option<Vec<ColumnFilter>>,
    pub column_visibility: Option<BTreeMap<String, bool>>,
    pub row_selection: Option<BTreeMap<String, bool>>,
    pub global_filter: Option<String>,
    pub scroll_top: Option<u32>,
}

impl SessionStatePatch {
    pub fn scroll(scroll_top: u32) -> Self {
        Self {
            scroll_top: Some(scroll_top),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold a later patch into this one; its present fields win
    pub fn merge(&mut self, later: SessionStatePatch) {
        if later.sorting.is_some() {
            self.sorting = later.sorting;
        }
        if later.column_filters.is_some() {
            self.column_filters = later.column_filters;
        }
        if later.column_visibility.is_some() {
            self.column_visibility = later.column_visibility;
        }
        if later.row_selection.is_some() {
            self.row_selection = later.row_selection;
        }
        if later.global_filter.is_some() {
            self.global_filter = later.global_filter;
        }
        if later.scroll_top.is_some() {
            self.scroll_top = later.scroll_top;
        }
    }
}

impl SessionState {
    pub fn apply(&mut self, patch: SessionStatePatch) {
        if let Some(sorting) = patch.sorting {
            self.sorting = sorting;
        }
        if let Some(filters) = patch.column_filters {
            self.column_filters = filters;
        }
        if let Some(visibility) = patch.column_visibility {
            self.column_visibility = visibility;
        }
        if let Some(selection) = patch.row_selection {
            self.row_selection = selection;
        }
        if let Some(filter) = patch.global_filter {
            self.global_filter = filter;
        }
        if let Some(scroll) = patch.scroll_top {
            self.scroll_top = scroll;
        }
    }
}

/// Timing knobs for the cache
#[derive(Debug, Clone, Copy)]
pub struct SessionStateTiming {
    pub debounce: Duration,
    pub scroll_restore_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionStateTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            scroll_restore_grace: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Slot {
    state: SessionState,
    /// False until the stored copy has been read; a write first merges
    /// `unloaded_changes` over it.
    loaded: bool,
    unloaded_changes: SessionStatePatch,
    pending: bool,
    generation: u64,
    last_persisted: Option<SessionState>,
    suppress_scroll_until: Option<Instant>,
    write_lock: Arc<AsyncMutex<()>>,
}

impl Slot {
    fn new(state: SessionState, persisted: Option<SessionState>) -> Self {
        Self {
            state,
            loaded: true,
            unloaded_changes: SessionStatePatch::default(),
            pending: false,
            generation: 0,
            last_persisted: persisted,
            suppress_scroll_until: None,
            write_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Slot for a view whose stored state has not been read yet
    fn unloaded() -> Self {
        Self {
            loaded: false,
            ..Self::new(SessionState::default(), None)
        }
    }

    /// Rebase the in-memory changes onto the stored state
    fn merge_stored(&mut self, stored: Option<SessionState>) {
        let mut state = stored.clone().unwrap_or_default();
        state.apply(std::mem::take(&mut self.unloaded_changes));
        self.state = state;
        self.last_persisted = stored;
        self.loaded = true;
    }
}

struct Inner {
    backend: Arc<dyn PracticeBackend>,
    scope: StateScope,
    timing: SessionStateTiming,
    slots: Mutex<HashMap<SessionStateKey, Slot>>,
}

/// Debounced view-state store. Cloning shares the same slots.
#[derive(Clone)]
pub struct SessionStateCache {
    inner: Arc<Inner>,
}

impl SessionStateCache {
    pub fn new(backend: Arc<dyn PracticeBackend>, scope: StateScope, timing: SessionStateTiming) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                scope,
                timing,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Current state for a view, loading it from the backend on first use
    pub async fn load(&self, key: SessionStateKey) -> SessionState {
        if let Some(slot) = self.inner.slots().get(&key) {
            if slot.loaded {
                return slot.state.clone();
            }
        }

        match self.inner.fetch_stored(key).await {
            Ok(stored) => {
                let mut slots = self.inner.slots();
                let slot = slots.entry(key).or_insert_with(Slot::unloaded);
                if !slot.loaded {
                    slot.merge_stored(stored);
                }
                slot.state.clone()
            }
            Err(e) => {
                warn!(
                    user_id = key.user_id,
                    purpose = %key.purpose,
                    "Failed to load session state, using defaults: {}",
                    e
                );
                // Stays unloaded so a later write retries the read
                let mut slots = self.inner.slots();
                slots.entry(key).or_insert_with(Slot::unloaded).state.clone()
            }
        }
    }

    /// Load the state and open the scroll grace window for the restore
    /// that follows.
    pub async fn restore(&self, key: SessionStateKey) -> SessionState {
        let state = self.load(key).await;
        self.mark_scroll_restored(key);
        state
    }

    /// Ignore scroll changes for a short while after a programmatic restore
    pub fn mark_scroll_restored(&self, key: SessionStateKey) {
        let until = Instant::now() + self.inner.timing.scroll_restore_grace;
        let mut slots = self.inner.slots();
        let slot = slots.entry(key).or_insert_with(Slot::unloaded);
        slot.suppress_scroll_until = Some(until);
    }

    /// Apply a partial change and arm the debounce timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn record_change(&self, key: SessionStateKey, mut patch: SessionStatePatch) {
        let generation = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(key).or_insert_with(Slot::unloaded);

            if patch.scroll_top.is_some() {
                if let Some(until) = slot.suppress_scroll_until {
                    if Instant::now() < until {
                        debug!(user_id = key.user_id, purpose = %key.purpose, "Ignoring scroll save during restore grace");
                        patch.scroll_top = None;
                    } else {
                        slot.suppress_scroll_until = None;
                    }
                }
            }
            if patch.is_empty() {
                return;
            }

            if slot.loaded {
                let before = slot.state.clone();
                slot.state.apply(patch);
                if slot.state == before {
                    return;
                }
            } else {
                // The stored copy may differ, so every change counts
                slot.unloaded_changes.merge(patch.clone());
                slot.state.apply(patch);
            }

            slot.pending = true;
            slot.generation += 1;
            slot.generation
        };

        self.schedule(key, generation);
    }

    /// Write the pending change for `key`: now, or after a fresh debounce
    pub async fn flush(&self, key: SessionStateKey, immediate: bool) {
        if immediate {
            self.inner.write_pending(key).await;
            return;
        }

        let generation = {
            let mut slots = self.inner.slots();
            match slots.get_mut(&key) {
                Some(slot) if slot.pending => {
                    slot.generation += 1;
                    slot.generation
                }
                _ => return,
            }
        };
        self.schedule(key, generation);
    }

    /// Immediately write every pending change
    pub async fn flush_all(&self) {
        let pending: Vec<SessionStateKey> = self
            .inner
            .slots()
            .iter()
            .filter(|(_, slot)| slot.pending)
            .map(|(key, _)| *key)
            .collect();

        for key in pending {
            self.inner.write_pending(key).await;
        }
    }

    pub async fn on_visibility_hidden(&self) {
        self.flush_all().await;
    }

    pub async fn teardown(&self) {
        self.flush_all().await;
    }

    /// Forget the in-memory state for a view and delete its stored copy
    pub async fn clear_transient_data(&self, key: SessionStateKey) {
        self.inner.slots().remove(&key);

        if let Err(e) = bounded(
            self.inner.timing.request_timeout,
            self.inner.backend.delete_session_state(
                key.user_id,
                self.inner.scope,
                key.purpose,
                key.playlist_id,
            ),
        )
        .await
        {
            warn!(user_id = key.user_id, purpose = %key.purpose, "Failed to clear session state: {}", e);
        }
    }

    pub fn has_pending(&self, key: SessionStateKey) -> bool {
        self.inner
            .slots()
            .get(&key)
            .map(|slot| slot.pending)
            .unwrap_or(false)
    }

    /// In-memory state without touching the backend
    pub fn peek(&self, key: SessionStateKey) -> Option<SessionState> {
        self.inner.slots().get(&key).map(|slot| slot.state.clone())
    }

    fn schedule(&self, key: SessionStateKey, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let debounce = inner.timing.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let current = inner
                .slots()
                .get(&key)
                .map(|slot| slot.generation == generation)
                .unwrap_or(false);
            if current {
                inner.write_pending(key).await;
            }
        });
    }
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<SessionStateKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fetch_stored(&self, key: SessionStateKey) -> Result<Option<SessionState>> {
        bounded(
            self.timing.request_timeout,
            self.backend.fetch_session_state(key.user_id, self.scope, key.purpose, key.playlist_id),
        )
        .await
    }

    /// Read the stored copy for a slot created by a change before `load`.
    /// Returns false if the read failed; the write must then wait.
    async fn ensure_loaded(&self, key: SessionStateKey) -> bool {
        match self.slots().get(&key) {
            Some(slot) if !slot.loaded => {}
            _ => return true,
        }

        match self.fetch_stored(key).await {
            Ok(stored) => {
                if let Some(slot) = self.slots().get_mut(&key) {
                    if !slot.loaded {
                        slot.merge_stored(stored);
                    }
                }
                true
            }
            Err(e) => {
                warn!(
                    user_id = key.user_id,
                    purpose = %key.purpose,
                    "Failed to read stored session state, deferring write: {}",
                    e
                );
                false
            }
        }
    }

    async fn write_pending(&self, key: SessionStateKey) {
        let write_lock = match self.slots().get(&key) {
            Some(slot) => Arc::clone(&slot.write_lock),
            None => return,
        };
        let _guard = write_lock.lock().await;

        // Never overwrite a stored copy that has not been read
        if !self.ensure_loaded(key).await {
            return;
        }

        let state = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(&key) else {
                return;
            };
            if !slot.pending {
                return;
            }
            slot.pending = false;
            if slot.last_persisted.as_ref() == Some(&slot.state) {
                debug!(user_id = key.user_id, purpose = %key.purpose, "Session state unchanged, skipping write");
                return;
            }
            slot.state.clone()
        };

        let result = bounded(
            self.timing.request_timeout,
            self.backend.persist_session_state(
                key.user_id,
                self.scope,
                key.purpose,
                key.playlist_id,
                &state,
            ),
        )
        .await;

        let mut slots = self.slots();
        match result {
            Ok(()) => {
                debug!(user_id = key.user_id, purpose = %key.purpose, playlist_id = key.playlist_id, "Session state persisted");
                if let Some(slot) = slots.get_mut(&key) {
                    slot.last_persisted = Some(state);
                }
            }
            Err(e) => {
                warn!(
                    user_id = key.user_id,
                    purpose = %key.purpose,
                    playlist_id = key.playlist_id,
                    "Failed to persist session state: {}",
                    e
                );
                // Retried by the next flush
                if let Some(slot) = slots.get_mut(&key) {
                    slot.pending = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut state = SessionState {
            global_filter: "reel".to_string(),
            scroll_top: 40,
            ..Default::default()
        };
        state.apply(SessionStatePatch::scroll(120));

        assert_eq!(state.scroll_top, 120);
        assert_eq!(state.global_filter, "reel");
        assert!(SessionStatePatch::default().is_empty());
        assert!(!SessionStatePatch::scroll(0).is_empty());
    }

    #[test]
    fn test_state_json_shape() {
        let state = SessionState {
            sorting: vec![SortingRule {
                id: "title".to_string(),
                desc: true,
            }],
            scroll_top: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["sorting"][0]["id"], "title");
        assert_eq!(json["scrollTop"], 5);
        assert!(json.get("columnVisibility").is_some());

        // Missing keys fall back to defaults
        let parsed: SessionState = serde_json::from_str(r#"{"globalFilter":"jig"}"#).unwrap();
        assert_eq!(parsed.global_filter, "jig");
        assert!(parsed.sorting.is_empty());
    }

    #[test]
    fn test_view_purpose_parsing() {
        assert_eq!("Practice".parse::<ViewPurpose>().unwrap(), ViewPurpose::Practice);
        assert_eq!(ViewPurpose::Catalog.to_string(), "catalog");
        assert!(matches!("sidebar".parse::<ViewPurpose>(), Err(Error::BadRequest(_))));
    }
}
