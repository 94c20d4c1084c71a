//! Database row models

use serde::{Deserialize, Serialize};

/// One practice-queue row joined with the latest committed review and any
/// staged (tentative) review of the same tune
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueRow {
    pub tune_id: i64,
    pub title: Option<String>,
    pub bucket: Option<i64>,
    pub order_index: i64,
    pub completed_at: Option<String>,
    pub goal: Option<String>,

    // Latest committed practice record
    pub practiced: Option<String>,
    pub quality: Option<i64>,
    pub easiness: Option<f64>,
    pub difficulty: Option<f64>,
    pub interval: Option<i64>,
    pub stability: Option<f64>,
    pub repetitions: Option<i64>,
    pub step: Option<i64>,
    pub state: Option<i64>,
    pub review_date: Option<String>,

    // Staged evaluation overlay
    pub staged_grade: Option<String>,
    pub staged_quality: Option<i64>,
    pub staged_easiness: Option<f64>,
    pub staged_difficulty: Option<f64>,
    pub staged_interval: Option<i64>,
    pub staged_stability: Option<f64>,
    pub staged_repetitions: Option<i64>,
    pub staged_step: Option<i64>,
    pub staged_state: Option<i64>,
    pub staged_review_date: Option<String>,
}

/// Latest committed review for a tune, used as the scheduling baseline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PracticeRecordRow {
    pub tune_id: i64,
    pub practiced: Option<String>,
    pub quality: Option<i64>,
    pub easiness: Option<f64>,
    pub difficulty: Option<f64>,
    pub interval: Option<i64>,
    pub stability: Option<f64>,
    pub repetitions: Option<i64>,
    pub step: Option<i64>,
    pub state: Option<i64>,
    pub review_date: Option<String>,
}

/// Persisted view state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TableStateRow {
    pub user_id: i64,
    pub scope: String,
    pub purpose: String,
    pub playlist_id: i64,
    pub state_json: String,
    pub updated_at: String,
}
