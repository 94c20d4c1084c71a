//! Bucket classification
//!
//! Maps a scheduled (or last-due) timestamp to a review-urgency bucket
//! relative to the sitdown date and the user's delinquency window.
//!
//! With `lower = reference - window` (calendar days):
//!
//! | due date                          | classification   | bucket           |
//! |-----------------------------------|------------------|------------------|
//! | absent                            | `New`            | `None`           |
//! | unparseable                       | `Invalid`        | error            |
//! | `lower <= due <= reference`       | `DueToday`       | `DueToday`       |
//! | `lower - window <= due < lower`   | `RecentlyLapsed` | `RecentlyLapsed` |
//! | `due < lower - window`            | `Backfill`       | `Backfill`       |
//! | `due > reference`                 | `Future`         | `None`           |
//!
//! The date heuristic only applies when the upstream snapshot carries no
//! bucket for the item; see [`resolve_bucket`].

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tunetrees_common::time::parse_timestamp;

/// Review-urgency bucket of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    DueToday,
    RecentlyLapsed,
    Backfill,
    /// New, future, or otherwise unclassified; no urgency styling
    None,
}

impl Bucket {
    /// Decode the numeric bucket code used by the queue table.
    ///
    /// `None` here means the upstream value is unknown, not `Bucket::None`.
    pub fn from_code(code: i64) -> Option<Bucket> {
        match code {
            0 => Some(Bucket::None),
            1 => Some(Bucket::DueToday),
            2 => Some(Bucket::RecentlyLapsed),
            3 => Some(Bucket::Backfill),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Bucket::None => 0,
            Bucket::DueToday => 1,
            Bucket::RecentlyLapsed => 2,
            Bucket::Backfill => 3,
        }
    }

    /// Display priority: due items first, then lapsed, then backfill
    pub fn sort_rank(self) -> u8 {
        match self {
            Bucket::DueToday => 0,
            Bucket::RecentlyLapsed => 1,
            Bucket::Backfill => 2,
            Bucket::None => 3,
        }
    }
}

/// Result of classifying one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    DueToday,
    RecentlyLapsed,
    Backfill,
    /// No scheduled or last-due timestamp at all
    New,
    /// Scheduled after the reference date
    Future,
    /// Timestamp present but unparseable
    Invalid,
}

/// Raised when a malformed date is asked for its bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unparseable due date")]
pub struct InvalidDueDate;

impl Classification {
    /// Collapse to the five-way bucket domain; malformed dates stay an error
    pub fn bucket(self) -> Result<Bucket, InvalidDueDate> {
        match self {
            Classification::DueToday => Ok(Bucket::DueToday),
            Classification::RecentlyLapsed => Ok(Bucket::RecentlyLapsed),
            Classification::Backfill => Ok(Bucket::Backfill),
            Classification::New | Classification::Future => Ok(Bucket::None),
            Classification::Invalid => Err(InvalidDueDate),
        }
    }
}

/// Classify a stored timestamp.
///
/// Total over its inputs: negative windows are treated as zero and
/// out-of-range arithmetic saturates at the calendar minimum.
pub fn classify(
    reference: NaiveDate,
    delinquency_window_days: i64,
    scheduled_or_last_due: Option<&str>,
) -> Classification {
    match scheduled_or_last_due {
        None => Classification::New,
        Some(raw) if raw.trim().is_empty() => Classification::New,
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => classify_date(reference, delinquency_window_days, Some(ts.date())),
            None => Classification::Invalid,
        },
    }
}

/// Classify an already-parsed due date
pub fn classify_date(
    reference: NaiveDate,
    delinquency_window_days: i64,
    due: Option<NaiveDate>,
) -> Classification {
    let Some(due) = due else {
        return Classification::New;
    };

    let window = Days::new(delinquency_window_days.max(0) as u64);
    let lower = reference.checked_sub_days(window).unwrap_or(NaiveDate::MIN);
    let backfill_edge = lower.checked_sub_days(window).unwrap_or(NaiveDate::MIN);

    if due > reference {
        Classification::Future
    } else if due >= lower {
        Classification::DueToday
    } else if due >= backfill_edge {
        Classification::RecentlyLapsed
    } else {
        Classification::Backfill
    }
}

/// Pick the bucket for an entry: the upstream snapshot's value wins, the
/// date heuristic fills in for items it has not classified yet.
pub fn resolve_bucket(authoritative: Option<Bucket>, classification: Classification) -> Bucket {
    match authoritative {
        Some(bucket) => bucket,
        None => classification.bucket().unwrap_or(Bucket::None),
    }
}
