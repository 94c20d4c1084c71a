//! SQLite practice backend
//!
//! Implements [`PracticeBackend`] on top of the schema created by
//! `tunetrees_common::db::init`. Query code is grouped by concern:
//! - `queue`: queue generation, add, refill and reads
//! - `staging`: tentative grades and batch submission
//! - `view_state`: persisted table state
//! - `prefs`: per-user preferences and settings

pub mod prefs;
pub mod queue;
pub mod staging;
pub mod view_state;

use crate::backend::{AddItemsOutcome, EvaluationUpdate, PracticeBackend};
use crate::model::QueueEntry;
use crate::scheduler::SchedulerRegistry;
use crate::session_state::{SessionState, StateScope, ViewPurpose};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::warn;

/// Textual key for a sitdown date column
pub(crate) fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Clone)]
pub struct SqliteBackend {
    db: SqlitePool,
    schedulers: SchedulerRegistry,
    default_window_days: i64,
}

impl SqliteBackend {
    pub fn new(db: SqlitePool, default_window_days: i64) -> Self {
        Self {
            db,
            schedulers: SchedulerRegistry::with_sm2(),
            default_window_days,
        }
    }

    /// Replace the scheduling providers (e.g. to add FSRS)
    pub fn with_schedulers(mut self, schedulers: SchedulerRegistry) -> Self {
        self.schedulers = schedulers;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    async fn window_for(&self, user_id: i64) -> Result<i64> {
        match prefs::get_delinquency_window(&self.db, user_id).await? {
            Some(days) if days >= 0 => Ok(days),
            Some(days) => {
                warn!(user_id, days, "Ignoring negative delinquency window preference");
                Ok(self.default_window_days)
            }
            None => Ok(self.default_window_days),
        }
    }
}

#[async_trait]
impl PracticeBackend for SqliteBackend {
    async fn fetch_queue_snapshot(
        &self,
        user_id: i64,
        playlist_id: i64,
        sitdown_date: NaiveDate,
        force_regenerate: bool,
    ) -> Result<Vec<QueueEntry>> {
        if force_regenerate || !queue::queue_exists(&self.db, user_id, playlist_id, sitdown_date).await? {
            let window = self.window_for(user_id).await?;
            queue::generate_queue(&self.db, user_id, playlist_id, sitdown_date, window, force_regenerate)
                .await?;
        }
        queue::fetch_queue(&self.db, user_id, playlist_id, sitdown_date).await
    }

    async fn add_items_to_queue(
        &self,
        user_id: i64,
        playlist_id: i64,
        item_ids: &[i64],
        sitdown_date: NaiveDate,
    ) -> Result<AddItemsOutcome> {
        let window = self.window_for(user_id).await?;
        queue::add_items(&self.db, user_id, playlist_id, item_ids, sitdown_date, window).await
    }

    async fn refill_queue(
        &self,
        user_id: i64,
        playlist_id: i64,
        sitdown_date: NaiveDate,
        count: u32,
    ) -> Result<Vec<QueueEntry>> {
        let window = self.window_for(user_id).await?;
        let added = queue::refill(&self.db, user_id, playlist_id, sitdown_date, window, count).await?;
        if added.is_empty() {
            return Ok(Vec::new());
        }

        let entries = queue::fetch_queue(&self.db, user_id, playlist_id, sitdown_date).await?;
        Ok(entries
            .into_iter()
            .filter(|e| added.contains(&e.item_id))
            .collect())
    }

    async fn stage_evaluation(
        &self,
        playlist_id: i64,
        item_id: i64,
        grade: &str,
        sitdown_date: NaiveDate,
    ) -> Result<bool> {
        staging::stage(&self.db, &self.schedulers, playlist_id, item_id, grade, sitdown_date).await
    }

    async fn discard_staged_evaluation(&self, playlist_id: i64, item_id: i64) -> Result<bool> {
        staging::discard(&self.db, playlist_id, item_id).await
    }

    async fn submit_evaluations(
        &self,
        playlist_id: i64,
        updates: &BTreeMap<i64, EvaluationUpdate>,
        sitdown_date: NaiveDate,
    ) -> Result<()> {
        staging::submit(&self.db, &self.schedulers, playlist_id, updates, sitdown_date).await
    }

    async fn persist_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
        state: &SessionState,
    ) -> Result<()> {
        view_state::save(&self.db, user_id, scope, purpose, playlist_id, state).await
    }

    async fn fetch_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<Option<SessionState>> {
        view_state::load(&self.db, user_id, scope, purpose, playlist_id).await
    }

    async fn delete_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<()> {
        view_state::delete(&self.db, user_id, scope, purpose, playlist_id).await
    }

    async fn delinquency_window(&self, user_id: i64) -> Result<Option<i64>> {
        prefs::get_delinquency_window(&self.db, user_id).await
    }

    async fn stored_sitdown_date(&self, user_id: i64) -> Result<Option<String>> {
        prefs::get_setting(&self.db, user_id, prefs::SITDOWN_DATE_KEY).await
    }
}
