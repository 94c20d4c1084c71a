//! Practice queue data model
//!
//! Entries are plain values. Caches hand out clones or `Arc` snapshots and
//! every change is made by building a replacement, never by writing into a
//! shared entry.

use crate::bucket::{classify, resolve_bucket, Bucket, Classification};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheduling algorithm selected per playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmType {
    #[serde(rename = "SM2")]
    Sm2,
    #[serde(rename = "FSRS")]
    Fsrs,
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmType::Sm2 => write!(f, "SM2"),
            AlgorithmType::Fsrs => write!(f, "FSRS"),
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SM2" => Ok(AlgorithmType::Sm2),
            "FSRS" => Ok(AlgorithmType::Fsrs),
            other => Err(crate::Error::Scheduling(format!(
                "Unknown scheduling algorithm: {}",
                other
            ))),
        }
    }
}

/// Algorithm-specific scheduling payload.
///
/// SM2 uses quality/easiness/interval/repetitions; FSRS uses
/// difficulty/stability/step/state. The core never interprets these values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingFields {
    pub quality: Option<i64>,
    pub easiness: Option<f64>,
    pub difficulty: Option<f64>,
    pub interval: Option<i64>,
    pub stability: Option<f64>,
    pub repetitions: Option<i64>,
    pub step: Option<i64>,
    pub state: Option<i64>,
}

/// Lifecycle of one entry's evaluation within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationState {
    Unevaluated,
    /// Grade set locally, server confirmation outstanding
    Staging,
    Staged,
    Committed,
}

/// One repertoire item's practice-queue projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub item_id: i64,
    pub title: Option<String>,
    /// Derived bucket; authoritative only once refreshed from a snapshot
    pub bucket: Bucket,
    /// Bucket as reported by the upstream snapshot, if it reported one
    pub snapshot_bucket: Option<Bucket>,
    pub classification: Classification,
    pub scheduled_at: Option<String>,
    pub last_reviewed_at: Option<String>,
    pub scheduling: SchedulingFields,
    pub goal: Option<String>,
    pub order_index: i64,
    pub staged_evaluation: Option<String>,
    pub has_staged: bool,
    pub completed_at: Option<String>,
}

impl QueueEntry {
    /// Bare entry with no scheduling history
    pub fn new(item_id: i64) -> Self {
        Self {
            item_id,
            title: None,
            bucket: Bucket::None,
            snapshot_bucket: None,
            classification: Classification::New,
            scheduled_at: None,
            last_reviewed_at: None,
            scheduling: SchedulingFields::default(),
            goal: None,
            order_index: 0,
            staged_evaluation: None,
            has_staged: false,
            completed_at: None,
        }
    }

    /// Timestamp fed to the classifier: the schedule, else the last review
    pub fn due_reference(&self) -> Option<&str> {
        self.scheduled_at
            .as_deref()
            .or(self.last_reviewed_at.as_deref())
    }

    /// Recompute `classification` and `bucket` for a sitdown date
    pub fn annotate(&mut self, reference: NaiveDate, delinquency_window_days: i64) {
        self.classification = classify(reference, delinquency_window_days, self.due_reference());
        self.bucket = resolve_bucket(self.snapshot_bucket, self.classification);
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn evaluation_state(&self) -> EvaluationState {
        if self.completed_at.is_some() {
            EvaluationState::Committed
        } else if self.has_staged {
            EvaluationState::Staged
        } else if self.staged_evaluation.is_some() {
            EvaluationState::Staging
        } else {
            EvaluationState::Unevaluated
        }
    }
}

/// Identity of a snapshot fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub user_id: i64,
    pub playlist_id: i64,
    pub sitdown_date: NaiveDate,
    pub show_completed: bool,
}

/// Full unfiltered queue for one (user, playlist, sitdown date)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub key: SnapshotKey,
    pub delinquency_window_days: i64,
    pub entries: Vec<QueueEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl QueueSnapshot {
    pub fn entry(&self, item_id: i64) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.item_id == item_id)
    }

    /// Projection shown to the user; completed items only when requested
    pub fn display_entries(&self, show_completed: bool) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| show_completed || !e.is_completed())
            .cloned()
            .collect()
    }

    /// Counts over the unfiltered entries
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics::from_entries(&self.entries)
    }
}

/// Derived queue counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub due: usize,
    pub lapsed: usize,
    pub backfill: usize,
    pub future: usize,
    pub new: usize,
    pub invalid: usize,
    pub queued: usize,
    pub staged: usize,
    pub submitted: usize,
    /// Staged plus submitted
    pub reviewed: usize,
    /// Everything not yet submitted
    pub to_be_practiced: usize,
}

impl QueueMetrics {
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        let mut metrics = QueueMetrics {
            queued: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            match entry.bucket {
                Bucket::DueToday => metrics.due += 1,
                Bucket::RecentlyLapsed => metrics.lapsed += 1,
                Bucket::Backfill => metrics.backfill += 1,
                Bucket::None => match entry.classification {
                    Classification::Future => metrics.future += 1,
                    Classification::Invalid => metrics.invalid += 1,
                    _ => metrics.new += 1,
                },
            }

            match entry.evaluation_state() {
                EvaluationState::Committed => metrics.submitted += 1,
                EvaluationState::Staged => metrics.staged += 1,
                EvaluationState::Staging | EvaluationState::Unevaluated => {}
            }
        }

        metrics.reviewed = metrics.staged + metrics.submitted;
        metrics.to_be_practiced = metrics.queued - metrics.submitted;
        metrics
    }
}

/// Sort so due items precede lapsed, then backfill, then the rest;
/// ties keep queue order.
pub fn sort_for_display(entries: &mut [QueueEntry]) {
    entries.sort_by_key(|e| (e.bucket.sort_rank(), e.order_index));
}
