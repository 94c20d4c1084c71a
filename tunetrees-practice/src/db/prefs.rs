//! Per-user preferences and settings
//!
//! `user_preference` holds typed preferences; `user_setting` is a key-value
//! store for everything else (the stored sitdown date lives there).

use crate::Result;
use sqlx::{Pool, Sqlite};

/// Key under which the user's chosen sitdown date is stored
pub const SITDOWN_DATE_KEY: &str = "sitdown_date";

pub async fn get_delinquency_window(db: &Pool<Sqlite>, user_id: i64) -> Result<Option<i64>> {
    let window: Option<Option<i64>> = sqlx::query_scalar(
        "SELECT acceptable_delinquency_window FROM user_preference WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(window.flatten())
}

pub async fn set_delinquency_window(db: &Pool<Sqlite>, user_id: i64, days: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_preference (user_id, acceptable_delinquency_window)
        VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET acceptable_delinquency_window = excluded.acceptable_delinquency_window
        "#,
    )
    .bind(user_id)
    .bind(days)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get_setting(db: &Pool<Sqlite>, user_id: i64, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM user_setting WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .fetch_optional(db)
            .await?;

    Ok(value.flatten())
}

pub async fn set_setting(db: &Pool<Sqlite>, user_id: i64, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_setting (user_id, key, value, updated_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(user_id)
    .bind(key)
    .bind(value)
    .execute(db)
    .await?;

    Ok(())
}
