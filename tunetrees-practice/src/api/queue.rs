//! Queue endpoints

use crate::backend::AddItemsOutcome;
use crate::model::QueueEntry;
use crate::session::QueueView;
use crate::{AppState, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub show_submitted: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    pub force_regenerate: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefillRequest {
    pub count: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RefillResponse {
    pub added: Vec<QueueEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemsRequest {
    pub item_ids: Vec<i64>,
}

/// GET /api/practice/:user_id/:playlist_id/queue
///
/// `show_submitted` persists on the session until changed again.
pub async fn get_queue(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<QueueView>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    if let Some(show) = query.show_submitted {
        session.set_show_submitted(show);
    }
    Ok(Json(session.queue_view().await?))
}

/// POST /api/practice/:user_id/:playlist_id/queue/refresh
pub async fn refresh_queue(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<QueueView>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    session.refresh(request.force_regenerate).await?;
    Ok(Json(session.queue_view().await?))
}

/// POST /api/practice/:user_id/:playlist_id/queue/refill
pub async fn refill_queue(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
    Json(request): Json<RefillRequest>,
) -> Result<Json<RefillResponse>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    let added = session.refill(request.count).await?;
    Ok(Json(RefillResponse { added }))
}

/// POST /api/practice/:user_id/:playlist_id/queue/items
pub async fn add_items(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
    Json(request): Json<AddItemsRequest>,
) -> Result<Json<AddItemsOutcome>> {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    Ok(Json(session.add_items(&request.item_ids).await?))
}

/// POST /api/practice/:user_id/:playlist_id/scroll/:item_id
pub async fn scroll_to_item(
    State(state): State<AppState>,
    Path((user_id, playlist_id, item_id)): Path<(i64, i64, i64)>,
) -> StatusCode {
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    session.scroll_to_item(item_id);
    StatusCode::ACCEPTED
}
