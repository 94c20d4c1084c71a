//! Practice backend boundary
//!
//! Everything the practice core needs from storage or the network goes
//! through [`PracticeBackend`]. The SQLite implementation lives in
//! [`crate::db`]; tests substitute in-memory fakes.

use crate::model::QueueEntry;
use crate::session_state::{SessionState, StateScope, ViewPurpose};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Final grade for one item in a submission batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationUpdate {
    pub grade: String,
    pub goal: Option<String>,
}

/// Result of an explicit add-to-queue request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItemsOutcome {
    pub added: Vec<i64>,
    pub skipped: Vec<i64>,
}

#[async_trait]
pub trait PracticeBackend: Send + Sync {
    /// Current authoritative queue. With `force_regenerate == false` a
    /// previously computed queue is returned unchanged.
    async fn fetch_queue_snapshot(
        &self,
        user_id: i64,
        playlist_id: i64,
        sitdown_date: NaiveDate,
        force_regenerate: bool,
    ) -> Result<Vec<QueueEntry>>;

    /// Queue the given items; already-queued items are reported as skipped
    async fn add_items_to_queue(
        &self,
        user_id: i64,
        playlist_id: i64,
        item_ids: &[i64],
        sitdown_date: NaiveDate,
    ) -> Result<AddItemsOutcome>;

    /// Append up to `count` backlog items, due-today first
    async fn refill_queue(
        &self,
        user_id: i64,
        playlist_id: i64,
        sitdown_date: NaiveDate,
        count: u32,
    ) -> Result<Vec<QueueEntry>>;

    /// Persist a tentative grade. `Ok(false)` means the backend refused it.
    async fn stage_evaluation(
        &self,
        playlist_id: i64,
        item_id: i64,
        grade: &str,
        sitdown_date: NaiveDate,
    ) -> Result<bool>;

    /// Drop the tentative grade for an item
    async fn discard_staged_evaluation(&self, playlist_id: i64, item_id: i64) -> Result<bool>;

    /// Commit a batch of grades; all or nothing
    async fn submit_evaluations(
        &self,
        playlist_id: i64,
        updates: &BTreeMap<i64, EvaluationUpdate>,
        sitdown_date: NaiveDate,
    ) -> Result<()>;

    async fn persist_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
        state: &SessionState,
    ) -> Result<()>;

    async fn fetch_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<Option<SessionState>>;

    /// "Clear transient data"
    async fn delete_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<()>;

    /// User's acceptable delinquency window preference, if set
    async fn delinquency_window(&self, user_id: i64) -> Result<Option<i64>>;

    /// Sitdown date the user last chose, if any
    async fn stored_sitdown_date(&self, user_id: i64) -> Result<Option<String>>;
}

/// Run a backend call under a time bound; expiry is reported as
/// [`Error::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}
