//! Staging and submission endpoints

use crate::model::QueueEntry;
use crate::review::{ReviewOutcome, SubmitOutcome};
use crate::{AppState, Result};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    /// `again`, `hard`, `good`, `easy`, or empty to clear
    #[serde(default)]
    pub grade: String,
}

#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub item_id: i64,
    pub outcome: ReviewOutcome,
    /// Entry as it stands after the operation
    pub entry: Option<QueueEntry>,
}

/// PUT /api/practice/:user_id/:playlist_id/evaluations/:item_id
pub async fn stage_evaluation(
    State(state): State<AppState>,
    Path((user_id, playlist_id, item_id)): Path<(i64, i64, i64)>,
    Json(request): Json<StageRequest>,
) -> Result<Json<StageResponse>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    let outcome = session.stage(item_id, &request.grade).await?;

    Ok(Json(StageResponse {
        item_id,
        outcome,
        entry: session.cache().entry(item_id),
    }))
}

/// POST /api/practice/:user_id/:playlist_id/evaluations/submit
pub async fn submit_evaluations(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
) -> Result<Json<SubmitOutcome>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    Ok(Json(session.submit().await?))
}
