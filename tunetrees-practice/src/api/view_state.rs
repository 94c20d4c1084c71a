//! View-state endpoints
//!
//! Writes are accepted immediately and persisted by the session's
//! debounced cache; `flush` and `visibility-hidden` force them out.

use crate::session_state::{SessionState, SessionStateKey, SessionStatePatch, ViewPurpose};
use crate::{AppState, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FlushQuery {
    pub immediate: Option<bool>,
}

fn state_key(user_id: i64, playlist_id: i64, purpose: &str) -> Result<SessionStateKey> {
    Ok(SessionStateKey {
        user_id,
        purpose: purpose.parse::<ViewPurpose>()?,
        playlist_id,
    })
}

/// GET /api/practice/:user_id/:playlist_id/view-state/:purpose
///
/// Treated as a restore: scroll saves are ignored for the grace window.
pub async fn get_view_state(
    State(state): State<AppState>,
    Path((user_id, playlist_id, purpose)): Path<(i64, i64, String)>,
) -> Result<Json<SessionState>> {
    let key = state_key(user_id, playlist_id, &purpose)?;
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    Ok(Json(session.view_state().restore(key).await))
}

/// PATCH /api/practice/:user_id/:playlist_id/view-state/:purpose
pub async fn patch_view_state(
    State(state): State<AppState>,
    Path((user_id, playlist_id, purpose)): Path<(i64, i64, String)>,
    Json(patch): Json<SessionStatePatch>,
) -> Result<StatusCode> {
    let key = state_key(user_id, playlist_id, &purpose)?;
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    session.view_state().record_change(key, patch);
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/practice/:user_id/:playlist_id/view-state/:purpose/flush
pub async fn flush_view_state(
    State(state): State<AppState>,
    Path((user_id, playlist_id, purpose)): Path<(i64, i64, String)>,
    Query(query): Query<FlushQuery>,
) -> Result<StatusCode> {
    let key = state_key(user_id, playlist_id, &purpose)?;
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    session
        .view_state()
        .flush(key, query.immediate.unwrap_or(true))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/practice/:user_id/:playlist_id/view-state/:purpose
pub async fn clear_view_state(
    State(state): State<AppState>,
    Path((user_id, playlist_id, purpose)): Path<(i64, i64, String)>,
) -> Result<StatusCode> {
    let key = state_key(user_id, playlist_id, &purpose)?;
    let session = state.registry.get_or_init(user_id, playlist_id).await;
    session.view_state().clear_transient_data(key).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/practice/:user_id/:playlist_id/visibility-hidden
pub async fn visibility_hidden(
    State(state): State<AppState>,
    Path((user_id, playlist_id)): Path<(i64, i64)>,
) -> StatusCode {
    if let Some(session) = state.registry.get(user_id, playlist_id).await {
        session.on_visibility_hidden().await;
    }
    StatusCode::NO_CONTENT
}
