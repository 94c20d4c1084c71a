//! Staged review coordinator
//!
//! Drives each queue item through its evaluation lifecycle:
//!
//! ```text
//! Unevaluated --grade--> Staging --ok--> Staged --submit--> Committed
//!      ^                    |              |
//!      +------failure-------+              |
//!      +----------------clear--------------+
//! ```
//!
//! Local state is changed optimistically before the backend is asked.
//! Every stage or clear request takes a per-item sequence number; a
//! response whose sequence is no longer the latest for its item is
//! discarded. Requests for the same item are also sent one at a time, so
//! the backend sees them in the order the user made them.

mod optimistic;

pub use optimistic::OptimisticUpdate;

use crate::backend::{bounded, EvaluationUpdate, PracticeBackend};
use crate::model::{EvaluationState, QueueEntry, SchedulingFields};
use crate::scheduler::Grade;
use crate::snapshot::QueueSnapshotCache;
use crate::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tunetrees_common::events::{EventBus, PracticeEvent};
use tunetrees_common::time::{format_timestamp, now};

/// What a stage or clear call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Staged,
    Cleared,
    /// Nothing to do; the entry already had the requested value
    Unchanged,
    /// A newer request for the same item took over
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub submitted: Vec<i64>,
    /// Graded locally but not yet confirmed by the backend; left for the
    /// next submission
    pub unconfirmed: Vec<i64>,
}

#[derive(Default)]
struct Tracker {
    next_seq: u64,
    latest: HashMap<i64, u64>,
    /// Committed scheduling fields captured before the first grade
    baselines: HashMap<i64, SchedulingFields>,
    item_locks: HashMap<i64, Arc<AsyncMutex<()>>>,
    submitting: bool,
}

impl Tracker {
    fn begin(&mut self, item_id: i64) -> u64 {
        self.next_seq += 1;
        self.latest.insert(item_id, self.next_seq);
        self.next_seq
    }

    fn is_current(&self, item_id: i64, seq: u64) -> bool {
        self.latest.get(&item_id) == Some(&seq)
    }

    fn item_lock(&mut self, item_id: i64) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.item_locks.entry(item_id).or_default())
    }

    /// Grades are frozen while a batch is being committed
    fn ensure_not_submitting(&self) -> Result<()> {
        if self.submitting {
            return Err(Error::InvalidState(
                "Evaluations are being submitted; try again when it completes".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct StagedReviewCoordinator {
    playlist_id: i64,
    sitdown_date: NaiveDate,
    cache: Arc<QueueSnapshotCache>,
    backend: Arc<dyn PracticeBackend>,
    events: EventBus,
    request_timeout: Duration,
    tracker: Mutex<Tracker>,
}

impl StagedReviewCoordinator {
    pub fn new(
        playlist_id: i64,
        sitdown_date: NaiveDate,
        cache: Arc<QueueSnapshotCache>,
        backend: Arc<dyn PracticeBackend>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Self {
        Self {
            playlist_id,
            sitdown_date,
            cache,
            backend,
            events,
            request_timeout,
            tracker: Mutex::new(Tracker::default()),
        }
    }

    /// Record a tentative grade for an item. A blank grade clears it.
    pub async fn stage(&self, item_id: i64, grade: &str) -> Result<ReviewOutcome> {
        let Some(grade) = Grade::parse_optional(grade)? else {
            return self.clear(item_id).await;
        };
        let grade = grade.as_str().to_string();

        let entry = self.require_entry(item_id)?;
        match entry.evaluation_state() {
            EvaluationState::Committed => {
                return Err(Error::InvalidState(format!(
                    "Item {} was already submitted",
                    item_id
                )));
            }
            EvaluationState::Staged if entry.staged_evaluation.as_deref() == Some(grade.as_str()) => {
                debug!(item_id, grade = %grade, "Grade already staged");
                return Ok(ReviewOutcome::Unchanged);
            }
            _ => {}
        }

        let (seq, item_lock) = {
            let mut tracker = self.tracker();
            tracker.ensure_not_submitting()?;
            if entry.evaluation_state() == EvaluationState::Unevaluated {
                tracker
                    .baselines
                    .entry(item_id)
                    .or_insert_with(|| entry.scheduling.clone());
            }
            (tracker.begin(item_id), tracker.item_lock(item_id))
        };

        let staged_grade = grade.clone();
        let update = OptimisticUpdate::apply(&self.cache, item_id, seq, move |e| {
            e.staged_evaluation = Some(staged_grade);
            e.has_staged = false;
        })?;
        debug!(item_id, seq, grade = %grade, "Grade applied locally");

        let _ordered = item_lock.lock().await;
        if !self.is_current(item_id, seq) {
            debug!(item_id, seq, "Staging superseded before send");
            return Ok(ReviewOutcome::Superseded);
        }

        let result = bounded(
            self.request_timeout,
            self.backend
                .stage_evaluation(self.playlist_id, item_id, &grade, self.sitdown_date),
        )
        .await;

        match result {
            Ok(true) => {
                if !self.is_current(item_id, seq) {
                    debug!(item_id, seq, "Discarding stale staging response");
                    return Ok(ReviewOutcome::Superseded);
                }
                self.confirm_staged(item_id, seq, &grade).await;
                Ok(ReviewOutcome::Staged)
            }
            Ok(false) => self.staging_failed(&update, "Backend rejected the grade".to_string()),
            Err(e) => self.staging_failed(&update, e.to_string()),
        }
    }

    /// Stage without waiting for the backend
    pub fn stage_in_background(
        self: &Arc<Self>,
        item_id: i64,
        grade: String,
    ) -> JoinHandle<Result<ReviewOutcome>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.stage(item_id, &grade).await })
    }

    /// Drop an item's tentative grade and restore its committed values
    pub async fn clear(&self, item_id: i64) -> Result<ReviewOutcome> {
        let entry = self.require_entry(item_id)?;
        match entry.evaluation_state() {
            EvaluationState::Committed => {
                return Err(Error::InvalidState(format!(
                    "Item {} was already submitted",
                    item_id
                )));
            }
            EvaluationState::Unevaluated => return Ok(ReviewOutcome::Unchanged),
            EvaluationState::Staging | EvaluationState::Staged => {}
        }

        let (seq, item_lock, baseline) = {
            let mut tracker = self.tracker();
            tracker.ensure_not_submitting()?;
            let baseline = tracker.baselines.get(&item_id).cloned();
            (tracker.begin(item_id), tracker.item_lock(item_id), baseline)
        };

        let update = OptimisticUpdate::apply(&self.cache, item_id, seq, move |e| {
            e.staged_evaluation = None;
            e.has_staged = false;
            if let Some(committed) = baseline {
                e.scheduling = committed;
            }
        })?;

        let _ordered = item_lock.lock().await;
        if !self.is_current(item_id, seq) {
            return Ok(ReviewOutcome::Superseded);
        }

        let result = bounded(
            self.request_timeout,
            self.backend
                .discard_staged_evaluation(self.playlist_id, item_id),
        )
        .await;

        match result {
            Ok(true) => {
                if !self.is_current(item_id, seq) {
                    debug!(item_id, seq, "Discarding stale clear response");
                    return Ok(ReviewOutcome::Superseded);
                }
                self.reconcile_cleared(item_id, seq).await;
                self.tracker().baselines.remove(&item_id);
                info!(item_id, playlist_id = self.playlist_id, "Staged evaluation cleared");
                self.events.emit_lossy(PracticeEvent::EvaluationCleared {
                    playlist_id: self.playlist_id,
                    item_id,
                    timestamp: Utc::now(),
                });
                Ok(ReviewOutcome::Cleared)
            }
            Ok(false) => self.clear_failed(&update, "Backend refused to discard the grade".to_string()),
            Err(e) => self.clear_failed(&update, e.to_string()),
        }
    }

    /// Commit every confirmed staged grade in one batch
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        {
            let mut tracker = self.tracker();
            if tracker.submitting {
                return Err(Error::InvalidState("Submission already in progress".to_string()));
            }
            tracker.submitting = true;
        }

        let result = self.submit_staged().await;
        self.tracker().submitting = false;
        result
    }

    async fn submit_staged(&self) -> Result<SubmitOutcome> {
        let entries = self
            .cache
            .current()
            .map(|snapshot| snapshot.entries.clone())
            .unwrap_or_default();

        let mut updates = BTreeMap::new();
        let mut unconfirmed = Vec::new();
        for entry in &entries {
            match (entry.evaluation_state(), entry.staged_evaluation.as_ref()) {
                (EvaluationState::Staged, Some(grade)) => {
                    updates.insert(
                        entry.item_id,
                        EvaluationUpdate {
                            grade: grade.clone(),
                            goal: entry.goal.clone(),
                        },
                    );
                }
                (EvaluationState::Staging, _) => unconfirmed.push(entry.item_id),
                _ => {}
            }
        }

        if updates.is_empty() {
            debug!(playlist_id = self.playlist_id, "Nothing staged to submit");
            return Ok(SubmitOutcome {
                submitted: Vec::new(),
                unconfirmed,
            });
        }

        let result = bounded(
            self.request_timeout,
            self.backend
                .submit_evaluations(self.playlist_id, &updates, self.sitdown_date),
        )
        .await;

        if let Err(e) = result {
            let message = e.to_string();
            warn!(
                playlist_id = self.playlist_id,
                items = updates.len(),
                "Submission failed, all items stay staged: {}",
                message
            );
            self.events.emit_lossy(PracticeEvent::SubmissionFailed {
                playlist_id: self.playlist_id,
                message: message.clone(),
                timestamp: Utc::now(),
            });
            return Err(Error::Submit(message));
        }

        let completed_at = format_timestamp(now().naive_utc());
        let submitted: Vec<i64> = updates.keys().copied().collect();
        {
            let mut tracker = self.tracker();
            for item_id in &submitted {
                // Late staging responses for these items must not land
                tracker.begin(*item_id);
                tracker.baselines.remove(item_id);
            }
        }
        for (item_id, update) in &updates {
            let grade = update.grade.clone();
            let stamp = completed_at.clone();
            self.cache.update_entry(*item_id, move |e| {
                e.staged_evaluation = Some(grade);
                e.has_staged = false;
                e.completed_at = Some(stamp);
            });
        }

        info!(
            playlist_id = self.playlist_id,
            submitted = submitted.len(),
            "Evaluations submitted"
        );
        self.events.emit_lossy(PracticeEvent::EvaluationsSubmitted {
            playlist_id: self.playlist_id,
            item_ids: submitted.clone(),
            timestamp: Utc::now(),
        });

        Ok(SubmitOutcome {
            submitted,
            unconfirmed,
        })
    }

    /// Mark the grade confirmed and merge the projected fields
    async fn confirm_staged(&self, item_id: i64, seq: u64, grade: &str) {
        let projected = match self.cache.fetch_backend_entry(item_id).await {
            Ok(fresh) => fresh.map(|e| e.scheduling),
            Err(e) => {
                warn!(item_id, "Could not fetch projected fields after staging: {}", e);
                None
            }
        };

        if !self.is_current(item_id, seq) {
            debug!(item_id, seq, "Discarding stale projection");
            return;
        }

        self.cache.update_entry(item_id, |e| {
            e.has_staged = true;
            if let Some(fields) = projected {
                e.scheduling = fields;
            }
        });

        info!(item_id, seq, grade = %grade, playlist_id = self.playlist_id, "Evaluation staged");
        self.events.emit_lossy(PracticeEvent::EvaluationStaged {
            playlist_id: self.playlist_id,
            item_id,
            grade: grade.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Restore committed values from the backend after a clear
    async fn reconcile_cleared(&self, item_id: i64, seq: u64) {
        let fresh = match self.cache.fetch_backend_entry(item_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(item_id, "Reconciling fetch after clear failed: {}", e);
                return;
            }
        };
        let Some(fresh) = fresh else {
            return;
        };
        if !self.is_current(item_id, seq) {
            return;
        }
        self.cache.update_entry(item_id, |e| merge_committed(e, fresh));
    }

    fn staging_failed(&self, update: &OptimisticUpdate, message: String) -> Result<ReviewOutcome> {
        let item_id = update.item_id();
        if !self.is_current(item_id, update.seq()) {
            debug!(item_id, seq = update.seq(), "Ignoring failure of superseded staging request");
            return Ok(ReviewOutcome::Superseded);
        }

        update.compensate(&self.cache);
        warn!(item_id, playlist_id = self.playlist_id, "Staging failed, grade rolled back: {}", message);
        self.events.emit_lossy(PracticeEvent::EvaluationStagingFailed {
            playlist_id: self.playlist_id,
            item_id,
            message: message.clone(),
            timestamp: Utc::now(),
        });
        Err(Error::Staging(message))
    }

    fn clear_failed(&self, update: &OptimisticUpdate, message: String) -> Result<ReviewOutcome> {
        let item_id = update.item_id();
        if !self.is_current(item_id, update.seq()) {
            return Ok(ReviewOutcome::Superseded);
        }

        update.compensate(&self.cache);
        warn!(item_id, playlist_id = self.playlist_id, "Clear failed, staged grade restored: {}", message);
        self.events.emit_lossy(PracticeEvent::EvaluationClearFailed {
            playlist_id: self.playlist_id,
            item_id,
            message: message.clone(),
            timestamp: Utc::now(),
        });
        Err(Error::Staging(message))
    }

    fn require_entry(&self, item_id: i64) -> Result<QueueEntry> {
        self.cache
            .entry(item_id)
            .ok_or_else(|| Error::NotFound(format!("Item {} is not in the queue", item_id)))
    }

    fn is_current(&self, item_id: i64, seq: u64) -> bool {
        self.tracker().is_current(item_id, seq)
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Overwrite the fields the backend owns, keeping local evaluation state
fn merge_committed(entry: &mut QueueEntry, fresh: QueueEntry) {
    entry.scheduling = fresh.scheduling;
    entry.scheduled_at = fresh.scheduled_at;
    entry.last_reviewed_at = fresh.last_reviewed_at;
    entry.snapshot_bucket = fresh.snapshot_bucket;
    entry.goal = fresh.goal;
}
