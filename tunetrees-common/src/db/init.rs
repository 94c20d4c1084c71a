//! Database initialization
//!
//! Creates the database file on first run and brings the schema up with
//! idempotent `CREATE TABLE IF NOT EXISTS` statements, so calling
//! [`init_database`] against an existing file is always safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    // WAL lets staging writes proceed while snapshot reads are in flight
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// A single connection is used because every SQLite in-memory connection
/// is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table used by the practice service
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_playlist_table(pool).await?;
    create_tune_table(pool).await?;
    create_playlist_tune_table(pool).await?;
    create_practice_record_table(pool).await?;
    create_practice_queue_table(pool).await?;
    create_staged_evaluation_table(pool).await?;
    create_table_state_table(pool).await?;
    create_user_preference_table(pool).await?;
    create_user_setting_table(pool).await?;
    Ok(())
}

async fn create_playlist_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist (
            playlist_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            algorithm TEXT NOT NULL DEFAULT 'SM2' CHECK (algorithm IN ('SM2', 'FSRS'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tune_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tune (
            tune_id INTEGER PRIMARY KEY,
            title TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_playlist_tune_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_tune (
            playlist_id INTEGER NOT NULL REFERENCES playlist(playlist_id) ON DELETE CASCADE,
            tune_id INTEGER NOT NULL REFERENCES tune(tune_id) ON DELETE CASCADE,
            goal TEXT NOT NULL DEFAULT 'recall',
            PRIMARY KEY (playlist_id, tune_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Committed reviews; the newest row per (playlist, tune) is authoritative
async fn create_practice_record_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_record (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            playlist_id INTEGER NOT NULL,
            tune_id INTEGER NOT NULL,
            practiced TEXT,
            quality INTEGER,
            easiness REAL,
            difficulty REAL,
            interval INTEGER,
            stability REAL,
            repetitions INTEGER,
            step INTEGER,
            state INTEGER,
            review_date TEXT,
            goal TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_practice_record_tune ON practice_record(playlist_id, tune_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_practice_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_queue (
            user_id INTEGER NOT NULL,
            playlist_id INTEGER NOT NULL,
            sitdown_date TEXT NOT NULL,
            tune_id INTEGER NOT NULL,
            bucket INTEGER,
            order_index INTEGER NOT NULL,
            completed_at TEXT,
            PRIMARY KEY (user_id, playlist_id, sitdown_date, tune_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One tentative grade per (playlist, tune); re-staging replaces the row
async fn create_staged_evaluation_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_evaluation (
            playlist_id INTEGER NOT NULL,
            tune_id INTEGER NOT NULL,
            sitdown_date TEXT NOT NULL,
            grade TEXT NOT NULL,
            goal TEXT,
            quality INTEGER,
            easiness REAL,
            difficulty REAL,
            interval INTEGER,
            stability REAL,
            repetitions INTEGER,
            step INTEGER,
            state INTEGER,
            review_date TEXT,
            PRIMARY KEY (playlist_id, tune_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_table_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS table_state (
            user_id INTEGER NOT NULL,
            scope TEXT NOT NULL,
            purpose TEXT NOT NULL,
            playlist_id INTEGER NOT NULL,
            state_json TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, scope, purpose, playlist_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_preference_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_preference (
            user_id INTEGER PRIMARY KEY,
            acceptable_delinquency_window INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-user key/value store (holds the remembered sitdown date)
async fn create_user_setting_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_setting (
            user_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
