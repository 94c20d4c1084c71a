//! Practice queue generation and reads
//!
//! A queue is stored per (user, playlist, sitdown date). Once generated it
//! is returned unchanged until a forced regeneration, so repeated fetches
//! for the same day see a stable list.

use super::date_key;
use crate::backend::AddItemsOutcome;
use crate::bucket::{classify, resolve_bucket, Bucket, Classification};
use crate::model::{QueueEntry, SchedulingFields};
use crate::Result;
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite, Transaction};
use tracing::{debug, info};
use tunetrees_common::db::models::QueueRow;
use tunetrees_common::time::parse_timestamp;

const QUEUE_SELECT: &str = r#"
    SELECT q.tune_id, t.title, q.bucket, q.order_index, q.completed_at, pt.goal,
           pr.practiced, pr.quality, pr.easiness, pr.difficulty, pr.interval,
           pr.stability, pr.repetitions, pr.step, pr.state, pr.review_date,
           s.grade AS staged_grade,
           s.quality AS staged_quality,
           s.easiness AS staged_easiness,
           s.difficulty AS staged_difficulty,
           s.interval AS staged_interval,
           s.stability AS staged_stability,
           s.repetitions AS staged_repetitions,
           s.step AS staged_step,
           s.state AS staged_state,
           s.review_date AS staged_review_date
    FROM practice_queue q
    LEFT JOIN tune t ON t.tune_id = q.tune_id
    LEFT JOIN playlist_tune pt ON pt.playlist_id = q.playlist_id AND pt.tune_id = q.tune_id
    LEFT JOIN practice_record pr ON pr.id = (
        SELECT MAX(id) FROM practice_record
        WHERE playlist_id = q.playlist_id AND tune_id = q.tune_id
    )
    LEFT JOIN staged_evaluation s
        ON s.playlist_id = q.playlist_id AND s.tune_id = q.tune_id
        AND s.sitdown_date = q.sitdown_date
    WHERE q.user_id = ? AND q.playlist_id = ? AND q.sitdown_date = ?
    ORDER BY q.order_index
"#;

/// Playlist tunes with their latest committed review date
const CANDIDATE_SELECT: &str = r#"
    SELECT pt.tune_id, pr.review_date
    FROM playlist_tune pt
    LEFT JOIN practice_record pr ON pr.id = (
        SELECT MAX(id) FROM practice_record
        WHERE playlist_id = pt.playlist_id AND tune_id = pt.tune_id
    )
    WHERE pt.playlist_id = ?
      AND pt.tune_id NOT IN (
          SELECT tune_id FROM practice_queue
          WHERE user_id = ? AND playlist_id = ? AND sitdown_date = ?
      )
    ORDER BY pt.tune_id
"#;

/// Convert a joined queue row into a queue entry.
///
/// A staged row, if present, overlays the committed scheduling fields.
pub fn row_to_entry(row: QueueRow) -> QueueEntry {
    let committed = SchedulingFields {
        quality: row.quality,
        easiness: row.easiness,
        difficulty: row.difficulty,
        interval: row.interval,
        stability: row.stability,
        repetitions: row.repetitions,
        step: row.step,
        state: row.state,
    };

    let staged = row.staged_grade.is_some() && row.completed_at.is_none();
    let scheduling = if staged {
        SchedulingFields {
            quality: row.staged_quality,
            easiness: row.staged_easiness,
            difficulty: row.staged_difficulty,
            interval: row.staged_interval,
            stability: row.staged_stability,
            repetitions: row.staged_repetitions,
            step: row.staged_step,
            state: row.staged_state,
        }
    } else {
        committed
    };

    let mut entry = QueueEntry::new(row.tune_id);
    entry.title = row.title;
    entry.snapshot_bucket = row.bucket.and_then(Bucket::from_code);
    entry.scheduled_at = row.review_date;
    entry.last_reviewed_at = row.practiced;
    entry.scheduling = scheduling;
    entry.goal = row.goal;
    entry.order_index = row.order_index;
    entry.staged_evaluation = if staged { row.staged_grade } else { None };
    entry.has_staged = staged;
    entry.completed_at = row.completed_at;
    entry
}

/// Read the stored queue
pub async fn fetch_queue(
    db: &Pool<Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query_as::<_, QueueRow>(QUEUE_SELECT)
        .bind(user_id)
        .bind(playlist_id)
        .bind(date_key(sitdown))
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(row_to_entry).collect())
}

pub async fn queue_exists(
    db: &Pool<Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM practice_queue WHERE user_id = ? AND playlist_id = ? AND sitdown_date = ?",
    )
    .bind(user_id)
    .bind(playlist_id)
    .bind(date_key(sitdown))
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

/// Build the day's queue from the playlist's review history.
///
/// Items due inside the delinquency window become `DueToday`, items one
/// window further back become `RecentlyLapsed`. New, future and long-overdue
/// items are left for refill. With `force`, uncompleted rows are dropped
/// first; completed rows always survive.
pub async fn generate_queue(
    db: &Pool<Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
    window_days: i64,
    force: bool,
) -> Result<usize> {
    let mut tx = db.begin().await?;

    if force {
        let removed = sqlx::query(
            r#"
            DELETE FROM practice_queue
            WHERE user_id = ? AND playlist_id = ? AND sitdown_date = ? AND completed_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(playlist_id)
        .bind(date_key(sitdown))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        debug!(playlist_id, removed, "Dropped uncompleted queue rows for regeneration");
    }

    let mut chosen: Vec<(i64, Option<String>, Bucket)> = candidates(&mut tx, user_id, playlist_id, sitdown)
        .await?
        .into_iter()
        .filter_map(|(tune_id, review_date)| {
            match classify(sitdown, window_days, review_date.as_deref()) {
                Classification::DueToday => Some((tune_id, review_date, Bucket::DueToday)),
                Classification::RecentlyLapsed => Some((tune_id, review_date, Bucket::RecentlyLapsed)),
                _ => None,
            }
        })
        .collect();
    chosen.sort_by_key(|(tune_id, review_date, bucket)| {
        (bucket.sort_rank(), review_date.as_deref().and_then(parse_timestamp), *tune_id)
    });

    let mut order_index = next_order_index(&mut tx, user_id, playlist_id, sitdown).await?;
    for (tune_id, _, bucket) in &chosen {
        insert_queue_row(&mut tx, user_id, playlist_id, sitdown, *tune_id, *bucket, order_index).await?;
        order_index += 1;
    }

    tx.commit().await?;

    info!(
        user_id,
        playlist_id,
        sitdown = %sitdown,
        queued = chosen.len(),
        "Practice queue generated"
    );
    Ok(chosen.len())
}

/// Queue specific items; items already queued or not in the playlist are
/// reported as skipped
pub async fn add_items(
    db: &Pool<Sqlite>,
    user_id: i64,
    playlist_id: i64,
    item_ids: &[i64],
    sitdown: NaiveDate,
    window_days: i64,
) -> Result<AddItemsOutcome> {
    let mut tx = db.begin().await?;
    let available = candidates(&mut tx, user_id, playlist_id, sitdown).await?;
    let mut order_index = next_order_index(&mut tx, user_id, playlist_id, sitdown).await?;

    let mut outcome = AddItemsOutcome::default();
    for item_id in item_ids {
        if outcome.added.contains(item_id) || outcome.skipped.contains(item_id) {
            continue;
        }
        let Some((_, review_date)) = available.iter().find(|(tune_id, _)| tune_id == item_id) else {
            outcome.skipped.push(*item_id);
            continue;
        };

        let bucket = resolve_bucket(None, classify(sitdown, window_days, review_date.as_deref()));
        insert_queue_row(&mut tx, user_id, playlist_id, sitdown, *item_id, bucket, order_index).await?;
        order_index += 1;
        outcome.added.push(*item_id);
    }

    tx.commit().await?;
    debug!(
        playlist_id,
        added = outcome.added.len(),
        skipped = outcome.skipped.len(),
        "Items added to queue"
    );
    Ok(outcome)
}

/// Append up to `count` unqueued items that are due or overdue.
///
/// Due-today candidates go first, then the oldest overdue; overdue items
/// are tagged `Backfill`. Returns the added item ids.
pub async fn refill(
    db: &Pool<Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
    window_days: i64,
    count: u32,
) -> Result<Vec<i64>> {
    let mut tx = db.begin().await?;

    let mut pool: Vec<(i64, Option<chrono::NaiveDateTime>, Bucket)> =
        candidates(&mut tx, user_id, playlist_id, sitdown)
            .await?
            .into_iter()
            .filter_map(|(tune_id, review_date)| {
                let due = review_date.as_deref().and_then(parse_timestamp);
                match classify(sitdown, window_days, review_date.as_deref()) {
                    Classification::DueToday => Some((tune_id, due, Bucket::DueToday)),
                    Classification::RecentlyLapsed | Classification::Backfill => {
                        Some((tune_id, due, Bucket::Backfill))
                    }
                    _ => None,
                }
            })
            .collect();
    pool.sort_by_key(|(tune_id, due, bucket)| (bucket.sort_rank(), *due, *tune_id));
    pool.truncate(count as usize);

    let mut order_index = next_order_index(&mut tx, user_id, playlist_id, sitdown).await?;
    let mut added = Vec::with_capacity(pool.len());
    for (tune_id, _, bucket) in pool {
        insert_queue_row(&mut tx, user_id, playlist_id, sitdown, tune_id, bucket, order_index).await?;
        order_index += 1;
        added.push(tune_id);
    }

    tx.commit().await?;
    info!(playlist_id, requested = count, added = added.len(), "Queue refilled");
    Ok(added)
}

async fn candidates(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
) -> Result<Vec<(i64, Option<String>)>> {
    let rows = sqlx::query_as::<_, (i64, Option<String>)>(CANDIDATE_SELECT)
        .bind(playlist_id)
        .bind(user_id)
        .bind(playlist_id)
        .bind(date_key(sitdown))
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows)
}

async fn next_order_index(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
) -> Result<i64> {
    let max: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(order_index), -1) FROM practice_queue
        WHERE user_id = ? AND playlist_id = ? AND sitdown_date = ?
        "#,
    )
    .bind(user_id)
    .bind(playlist_id)
    .bind(date_key(sitdown))
    .fetch_one(&mut **tx)
    .await?;
    Ok(max + 1)
}

async fn insert_queue_row(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    playlist_id: i64,
    sitdown: NaiveDate,
    tune_id: i64,
    bucket: Bucket,
    order_index: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO practice_queue
            (user_id, playlist_id, sitdown_date, tune_id, bucket, order_index)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(playlist_id)
    .bind(date_key(sitdown))
    .bind(tune_id)
    .bind(bucket.code())
    .bind(order_index)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
