//! Tentative grades and batch submission

use super::date_key;
use crate::backend::EvaluationUpdate;
use crate::model::{AlgorithmType, SchedulingFields};
use crate::scheduler::{Grade, Projection, SchedulerRegistry};
use crate::{Error, Result};
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use tunetrees_common::db::models::PracticeRecordRow;
use tunetrees_common::time::{format_timestamp, now};

/// Algorithm configured for a playlist, `None` if the playlist is unknown
pub async fn playlist_algorithm(db: &mut SqliteConnection, playlist_id: i64) -> Result<Option<AlgorithmType>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT algorithm FROM playlist WHERE playlist_id = ?")
        .bind(playlist_id)
        .fetch_optional(&mut *db)
        .await?;

    raw.map(|value| value.parse()).transpose()
}

/// Newest committed review for an item
pub async fn latest_record(
    db: &mut SqliteConnection,
    playlist_id: i64,
    tune_id: i64,
) -> Result<Option<PracticeRecordRow>> {
    let row = sqlx::query_as::<_, PracticeRecordRow>(
        r#"
        SELECT tune_id, practiced, quality, easiness, difficulty, interval,
               stability, repetitions, step, state, review_date
        FROM practice_record
        WHERE playlist_id = ? AND tune_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(playlist_id)
    .bind(tune_id)
    .fetch_optional(&mut *db)
    .await?;

    Ok(row)
}

async fn playlist_goal(db: &mut SqliteConnection, playlist_id: i64, tune_id: i64) -> Result<Option<Option<String>>> {
    let goal: Option<Option<String>> =
        sqlx::query_scalar("SELECT goal FROM playlist_tune WHERE playlist_id = ? AND tune_id = ?")
            .bind(playlist_id)
            .bind(tune_id)
            .fetch_optional(&mut *db)
            .await?;
    Ok(goal)
}

fn committed_fields(record: Option<&PracticeRecordRow>) -> SchedulingFields {
    record
        .map(|r| SchedulingFields {
            quality: r.quality,
            easiness: r.easiness,
            difficulty: r.difficulty,
            interval: r.interval,
            stability: r.stability,
            repetitions: r.repetitions,
            step: r.step,
            state: r.state,
        })
        .unwrap_or_default()
}

async fn project(
    conn: &mut SqliteConnection,
    schedulers: &SchedulerRegistry,
    algorithm: AlgorithmType,
    playlist_id: i64,
    tune_id: i64,
    grade: Grade,
    sitdown: NaiveDate,
) -> Result<Projection> {
    let scheduler = schedulers.get(algorithm)?;
    let record = latest_record(conn, playlist_id, tune_id).await?;
    scheduler.project(&committed_fields(record.as_ref()), grade, sitdown)
}

/// Project a grade and store it as the item's single tentative record.
/// A record left from an earlier sitdown date is replaced; queue reads only
/// pick up records staged for their own date.
///
/// Returns `Ok(false)` for a malformed grade or an item that is not in the
/// playlist.
pub async fn stage(
    db: &Pool<Sqlite>,
    schedulers: &SchedulerRegistry,
    playlist_id: i64,
    tune_id: i64,
    grade: &str,
    sitdown: NaiveDate,
) -> Result<bool> {
    let grade = match Grade::parse_optional(grade) {
        Ok(Some(grade)) => grade,
        Ok(None) | Err(_) => {
            warn!(playlist_id, tune_id, grade, "Refusing to stage malformed grade");
            return Ok(false);
        }
    };

    let mut conn = db.acquire().await?;
    let Some(algorithm) = playlist_algorithm(&mut *conn, playlist_id).await? else {
        return Ok(false);
    };
    let Some(goal) = playlist_goal(&mut *conn, playlist_id, tune_id).await? else {
        debug!(playlist_id, tune_id, "Item not in playlist, not staging");
        return Ok(false);
    };

    let projection = project(&mut *conn, schedulers, algorithm, playlist_id, tune_id, grade, sitdown).await?;
    let fields = &projection.fields;

    sqlx::query(
        r#"
        INSERT INTO staged_evaluation
            (playlist_id, tune_id, sitdown_date, grade, goal, quality, easiness, difficulty,
             interval, stability, repetitions, step, state, review_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(playlist_id, tune_id) DO UPDATE SET
            sitdown_date = excluded.sitdown_date,
            grade = excluded.grade,
            goal = excluded.goal,
            quality = excluded.quality,
            easiness = excluded.easiness,
            difficulty = excluded.difficulty,
            interval = excluded.interval,
            stability = excluded.stability,
            repetitions = excluded.repetitions,
            step = excluded.step,
            state = excluded.state,
            review_date = excluded.review_date
        "#,
    )
    .bind(playlist_id)
    .bind(tune_id)
    .bind(date_key(sitdown))
    .bind(grade.as_str())
    .bind(goal)
    .bind(fields.quality)
    .bind(fields.easiness)
    .bind(fields.difficulty)
    .bind(fields.interval)
    .bind(fields.stability)
    .bind(fields.repetitions)
    .bind(fields.step)
    .bind(fields.state)
    .bind(format_timestamp(projection.review_date))
    .execute(&mut *conn)
    .await?;

    debug!(playlist_id, tune_id, grade = %grade, algorithm = %algorithm, "Evaluation staged");
    Ok(true)
}

/// Delete the tentative record for an item; succeeds when none exists
pub async fn discard(db: &Pool<Sqlite>, playlist_id: i64, tune_id: i64) -> Result<bool> {
    let removed = sqlx::query("DELETE FROM staged_evaluation WHERE playlist_id = ? AND tune_id = ?")
        .bind(playlist_id)
        .bind(tune_id)
        .execute(db)
        .await?
        .rows_affected();

    debug!(playlist_id, tune_id, removed, "Staged evaluation discarded");
    Ok(true)
}

/// Commit a batch of grades in one transaction.
///
/// Each item gets a practice record, its queue row is stamped completed,
/// and its tentative record is removed. Any failure rolls back the batch.
pub async fn submit(
    db: &Pool<Sqlite>,
    schedulers: &SchedulerRegistry,
    playlist_id: i64,
    updates: &BTreeMap<i64, EvaluationUpdate>,
    sitdown: NaiveDate,
) -> Result<()> {
    let mut tx = db.begin().await?;

    let algorithm = playlist_algorithm(&mut *tx, playlist_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Playlist {} not found", playlist_id)))?;
    let practiced = format_timestamp(now().naive_utc());

    for (tune_id, update) in updates {
        let grade: Grade = update.grade.parse()?;
        let projection = project(&mut *tx, schedulers, algorithm, playlist_id, *tune_id, grade, sitdown).await?;
        let fields = &projection.fields;

        sqlx::query(
            r#"
            INSERT INTO practice_record
                (playlist_id, tune_id, practiced, quality, easiness, difficulty, interval,
                 stability, repetitions, step, state, review_date, goal)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(playlist_id)
        .bind(*tune_id)
        .bind(&practiced)
        .bind(fields.quality)
        .bind(fields.easiness)
        .bind(fields.difficulty)
        .bind(fields.interval)
        .bind(fields.stability)
        .bind(fields.repetitions)
        .bind(fields.step)
        .bind(fields.state)
        .bind(format_timestamp(projection.review_date))
        .bind(update.goal.clone())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE practice_queue SET completed_at = ?
            WHERE playlist_id = ? AND sitdown_date = ? AND tune_id = ? AND completed_at IS NULL
            "#,
        )
        .bind(&practiced)
        .bind(playlist_id)
        .bind(date_key(sitdown))
        .bind(*tune_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM staged_evaluation WHERE playlist_id = ? AND tune_id = ?")
            .bind(playlist_id)
            .bind(*tune_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!(playlist_id, items = updates.len(), "Evaluations committed");
    Ok(())
}
