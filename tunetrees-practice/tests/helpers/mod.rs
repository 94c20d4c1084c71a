//! Shared test fixtures
//!
//! `FakeBackend` is an in-memory `PracticeBackend` that records every call
//! and can be told to fail, refuse or stall individual operations.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tunetrees_common::db::init_memory_database;
use tunetrees_common::events::EventBus;
use tunetrees_practice::backend::{AddItemsOutcome, EvaluationUpdate, PracticeBackend};
use tunetrees_practice::model::{QueueEntry, SchedulingFields, SnapshotKey};
use tunetrees_practice::scheduler::{Grade, Scheduler, Sm2Scheduler};
use tunetrees_practice::session_state::{SessionState, StateScope, ViewPurpose};
use tunetrees_practice::snapshot::QueueSnapshotCache;
use tunetrees_practice::{Error, Result};

pub const USER: i64 = 1;
pub const PLAYLIST: i64 = 10;

pub fn sitdown() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

pub fn key(show_completed: bool) -> SnapshotKey {
    SnapshotKey {
        user_id: USER,
        playlist_id: PLAYLIST,
        sitdown_date: sitdown(),
        show_completed,
    }
}

/// Committed SM2 fields every fixture entry starts from
pub fn committed_fields() -> SchedulingFields {
    SchedulingFields {
        quality: Some(4),
        easiness: Some(2.5),
        interval: Some(4),
        repetitions: Some(2),
        ..Default::default()
    }
}

pub fn entry(item_id: i64, scheduled: Option<&str>) -> QueueEntry {
    let mut e = QueueEntry::new(item_id);
    e.title = Some(format!("Tune {}", item_id));
    e.scheduled_at = scheduled.map(str::to_string);
    e.scheduling = committed_fields();
    e.goal = Some("recall".to_string());
    e.order_index = item_id;
    e
}

type StateKey = (i64, StateScope, ViewPurpose, i64);

#[derive(Default)]
pub struct FakeState {
    pub queue: Vec<QueueEntry>,
    pub backlog: Vec<QueueEntry>,
    pub staged: HashMap<i64, String>,
    pub projected: HashMap<i64, SchedulingFields>,
    pub stage_log: Vec<(i64, String)>,
    pub discard_log: Vec<i64>,
    pub submissions: Vec<BTreeMap<i64, EvaluationUpdate>>,
    pub persisted: Vec<(StateKey, SessionState)>,
    pub stored_states: HashMap<StateKey, SessionState>,
    pub window: Option<i64>,
    pub stored_sitdown: Option<String>,

    pub fail_fetch: bool,
    pub fail_stage: bool,
    pub reject_stage: bool,
    pub fail_discard: bool,
    pub fail_submit: bool,
    pub fail_persist: bool,
    pub fail_load_state: bool,

    pub fetch_delay: Duration,
    /// Per-call staging delays, consumed front to back
    pub stage_delays: VecDeque<Duration>,
    pub submit_delay: Duration,
    pub persist_delay: Duration,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    pub fetch_calls: AtomicUsize,
    pub stage_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub persist_calls: AtomicUsize,
    persists_in_flight: AtomicUsize,
    pub max_persists_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new(queue: Vec<QueueEntry>) -> Arc<Self> {
        let backend = Self::default();
        backend.state().queue = queue;
        Arc::new(backend)
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn stages(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub fn persists(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn persisted_states(&self) -> Vec<SessionState> {
        self.state().persisted.iter().map(|(_, s)| s.clone()).collect()
    }

    fn overlay(&self, entry: &QueueEntry) -> QueueEntry {
        let state = self.state();
        let mut e = entry.clone();
        if e.completed_at.is_none() {
            if let Some(grade) = state.staged.get(&e.item_id) {
                e.staged_evaluation = Some(grade.clone());
                e.has_staged = true;
                if let Some(fields) = state.projected.get(&e.item_id) {
                    e.scheduling = fields.clone();
                }
            }
        }
        e
    }
}

#[async_trait]
impl PracticeBackend for FakeBackend {
    async fn fetch_queue_snapshot(
        &self,
        _user_id: i64,
        _playlist_id: i64,
        _sitdown_date: NaiveDate,
        _force_regenerate: bool,
    ) -> Result<Vec<QueueEntry>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().fetch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state().fail_fetch {
            return Err(Error::Fetch("connection reset".to_string()));
        }
        let queue = self.state().queue.clone();
        Ok(queue.iter().map(|e| self.overlay(e)).collect())
    }

    async fn add_items_to_queue(
        &self,
        _user_id: i64,
        _playlist_id: i64,
        item_ids: &[i64],
        _sitdown_date: NaiveDate,
    ) -> Result<AddItemsOutcome> {
        let mut state = self.state();
        let mut outcome = AddItemsOutcome::default();
        for id in item_ids {
            if state.queue.iter().any(|e| e.item_id == *id) {
                outcome.skipped.push(*id);
            } else if let Some(pos) = state.backlog.iter().position(|e| e.item_id == *id) {
                let e = state.backlog.remove(pos);
                state.queue.push(e);
                outcome.added.push(*id);
            } else {
                outcome.skipped.push(*id);
            }
        }
        Ok(outcome)
    }

    async fn refill_queue(
        &self,
        _user_id: i64,
        _playlist_id: i64,
        _sitdown_date: NaiveDate,
        count: u32,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.state();
        let take = (count as usize).min(state.backlog.len());
        let added: Vec<QueueEntry> = state.backlog.drain(..take).collect();
        for e in &added {
            if !state.queue.iter().any(|q| q.item_id == e.item_id) {
                state.queue.push(e.clone());
            }
        }
        Ok(added)
    }

    async fn stage_evaluation(
        &self,
        _playlist_id: i64,
        item_id: i64,
        grade: &str,
        sitdown_date: NaiveDate,
    ) -> Result<bool> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().stage_delays.pop_front().unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.stage_log.push((item_id, grade.to_string()));
        if state.fail_stage {
            return Err(Error::Staging("server unavailable".to_string()));
        }
        if state.reject_stage {
            return Ok(false);
        }
        let Some(base) = state.queue.iter().find(|e| e.item_id == item_id).cloned() else {
            return Ok(false);
        };
        let Ok(parsed) = grade.parse::<Grade>() else {
            return Ok(false);
        };

        let projection = Sm2Scheduler.project(&base.scheduling, parsed, sitdown_date)?;
        state.staged.insert(item_id, grade.to_string());
        state.projected.insert(item_id, projection.fields);
        Ok(true)
    }

    async fn discard_staged_evaluation(&self, _playlist_id: i64, item_id: i64) -> Result<bool> {
        let mut state = self.state();
        state.discard_log.push(item_id);
        if state.fail_discard {
            return Err(Error::Staging("server unavailable".to_string()));
        }
        state.staged.remove(&item_id);
        state.projected.remove(&item_id);
        Ok(true)
    }

    async fn submit_evaluations(
        &self,
        _playlist_id: i64,
        updates: &BTreeMap<i64, EvaluationUpdate>,
        _sitdown_date: NaiveDate,
    ) -> Result<()> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().submit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_submit {
            return Err(Error::Submit("500 Internal Server Error".to_string()));
        }
        for item_id in updates.keys() {
            let projected = state.projected.remove(item_id);
            state.staged.remove(item_id);
            if let Some(e) = state.queue.iter_mut().find(|e| e.item_id == *item_id) {
                e.completed_at = Some("2024-06-10 12:00:00".to_string());
                if let Some(fields) = projected {
                    e.scheduling = fields;
                }
            }
        }
        state.submissions.push(updates.clone());
        Ok(())
    }

    async fn persist_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
        session_state: &SessionState,
    ) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.persists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_persists_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.state().persist_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.persists_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.fail_persist {
            return Err(Error::Persistence("quota exceeded".to_string()));
        }
        let key = (user_id, scope, purpose, playlist_id);
        state.persisted.push((key, session_state.clone()));
        state.stored_states.insert(key, session_state.clone());
        Ok(())
    }

    async fn fetch_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<Option<SessionState>> {
        if self.state().fail_load_state {
            return Err(Error::Persistence("storage unavailable".to_string()));
        }
        Ok(self
            .state()
            .stored_states
            .get(&(user_id, scope, purpose, playlist_id))
            .cloned())
    }

    async fn delete_session_state(
        &self,
        user_id: i64,
        scope: StateScope,
        purpose: ViewPurpose,
        playlist_id: i64,
    ) -> Result<()> {
        self.state()
            .stored_states
            .remove(&(user_id, scope, purpose, playlist_id));
        Ok(())
    }

    async fn delinquency_window(&self, _user_id: i64) -> Result<Option<i64>> {
        Ok(self.state().window)
    }

    async fn stored_sitdown_date(&self, _user_id: i64) -> Result<Option<String>> {
        Ok(self.state().stored_sitdown.clone())
    }
}

/// Snapshot cache over a fake backend with a 7-day window
pub fn cache_for(backend: &Arc<FakeBackend>, events: &EventBus) -> Arc<QueueSnapshotCache> {
    Arc::new(QueueSnapshotCache::new(
        backend.clone(),
        events.clone(),
        7,
        Duration::from_secs(10),
    ))
}

/// Tune ids of the seeded library.
///
/// Relative to a 2024-06-10 sitdown with a 7-day window: `DUE` was
/// scheduled yesterday, `LAPSED` nine days ago, `FUTURE` in five days,
/// `NEW` has no history and `OLD` is years overdue.
pub const LAPSED: i64 = 1;
pub const DUE: i64 = 2;
pub const FUTURE: i64 = 3;
pub const NEW: i64 = 4;
pub const OLD: i64 = 5;

/// In-memory database holding one SM2 playlist with five tunes
pub async fn seeded_pool() -> SqlitePool {
    let pool = init_memory_database().await.unwrap();

    sqlx::query("INSERT INTO playlist (playlist_id, user_id, algorithm) VALUES (?, ?, 'SM2')")
        .bind(PLAYLIST)
        .bind(USER)
        .execute(&pool)
        .await
        .unwrap();

    let tunes = [
        (LAPSED, "The Kesh", Some("2024-06-01 00:00:00")),
        (DUE, "Drowsy Maggie", Some("2024-06-09 00:00:00")),
        (FUTURE, "Cooley's", Some("2024-06-15 00:00:00")),
        (NEW, "The Silver Spear", None),
        (OLD, "Morrison's", Some("2020-02-01 00:00:00")),
    ];
    for (tune_id, title, review_date) in tunes {
        sqlx::query("INSERT INTO tune (tune_id, title) VALUES (?, ?)")
            .bind(tune_id)
            .bind(title)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO playlist_tune (playlist_id, tune_id) VALUES (?, ?)")
            .bind(PLAYLIST)
            .bind(tune_id)
            .execute(&pool)
            .await
            .unwrap();

        if let Some(review_date) = review_date {
            sqlx::query(
                r#"
                INSERT INTO practice_record
                    (playlist_id, tune_id, practiced, quality, easiness, interval, repetitions, review_date, goal)
                VALUES (?, ?, '2024-05-28 09:00:00', 4, 2.5, 4, 2, ?, 'recall')
                "#,
            )
            .bind(PLAYLIST)
            .bind(tune_id)
            .bind(review_date)
            .execute(&pool)
            .await
            .unwrap();
        }
    }

    sqlx::query("INSERT INTO user_preference (user_id, acceptable_delinquency_window) VALUES (?, 7)")
        .bind(USER)
        .execute(&pool)
        .await
        .unwrap();

    pool
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}
