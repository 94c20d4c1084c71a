//! Persisted table view state

use crate::session_state::{SessionState, StateScope, ViewPurpose};
use crate::Result;
use sqlx::{Pool, Sqlite};
use tunetrees_common::db::models::TableStateRow;

/// Upsert the state for one view; writing the same state again leaves a
/// single row with the same content
pub async fn save(
    db: &Pool<Sqlite>,
    user_id: i64,
    scope: StateScope,
    purpose: ViewPurpose,
    playlist_id: i64,
    state: &SessionState,
) -> Result<()> {
    let state_json = serde_json::to_string(state)?;

    sqlx::query(
        r#"
        INSERT INTO table_state (user_id, scope, purpose, playlist_id, state_json, updated_at)
        VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(user_id, scope, purpose, playlist_id) DO UPDATE SET
            state_json = excluded.state_json,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(user_id)
    .bind(scope.as_str())
    .bind(purpose.as_str())
    .bind(playlist_id)
    .bind(state_json)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn load(
    db: &Pool<Sqlite>,
    user_id: i64,
    scope: StateScope,
    purpose: ViewPurpose,
    playlist_id: i64,
) -> Result<Option<SessionState>> {
    let row = sqlx::query_as::<_, TableStateRow>(
        r#"
        SELECT user_id, scope, purpose, playlist_id, state_json, updated_at
        FROM table_state
        WHERE user_id = ? AND scope = ? AND purpose = ? AND playlist_id = ?
        "#,
    )
    .bind(user_id)
    .bind(scope.as_str())
    .bind(purpose.as_str())
    .bind(playlist_id)
    .fetch_optional(db)
    .await?;

    match row {
        Some(row) => Ok(Some(serde_json::from_str(&row.state_json)?)),
        None => Ok(None),
    }
}

pub async fn delete(
    db: &Pool<Sqlite>,
    user_id: i64,
    scope: StateScope,
    purpose: ViewPurpose,
    playlist_id: i64,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM table_state WHERE user_id = ? AND scope = ? AND purpose = ? AND playlist_id = ?",
    )
    .bind(user_id)
    .bind(scope.as_str())
    .bind(purpose.as_str())
    .bind(playlist_id)
    .execute(db)
    .await?;

    Ok(())
}
