//! Scheduling providers
//!
//! The practice core treats scheduling as opaque: a provider receives the
//! last committed fields plus a grade and returns projected fields and the
//! next review date. SM2 ships in-tree; FSRS providers are registered by the
//! embedding application.

use crate::model::{AlgorithmType, SchedulingFields};
use crate::{Error, Result};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// User-facing recall grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Parse a staged-evaluation string.
    ///
    /// Blank input means "no grade" and yields `Ok(None)`.
    pub fn parse_optional(raw: &str) -> Result<Option<Grade>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Again => "again",
            Grade::Hard => "hard",
            Grade::Good => "good",
            Grade::Easy => "easy",
        }
    }

    /// SM2 quality on the 0-5 scale
    pub fn sm2_quality(self) -> i64 {
        match self {
            Grade::Again => 1,
            Grade::Hard => 3,
            Grade::Good => 4,
            Grade::Easy => 5,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "again" => Ok(Grade::Again),
            "hard" => Ok(Grade::Hard),
            "good" => Ok(Grade::Good),
            "easy" => Ok(Grade::Easy),
            _ => Err(Error::InvalidGrade(s.to_string())),
        }
    }
}

/// Projected outcome of a grade
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub fields: SchedulingFields,
    pub review_date: NaiveDateTime,
}

/// Opaque next-due provider
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn project(
        &self,
        prior: &SchedulingFields,
        grade: Grade,
        sitdown: NaiveDate,
    ) -> Result<Projection>;
}

/// Classic SuperMemo-2
#[derive(Debug, Clone, Copy, Default)]
pub struct Sm2Scheduler;

const SM2_INITIAL_EASINESS: f64 = 2.5;
const SM2_MIN_EASINESS: f64 = 1.3;

impl Scheduler for Sm2Scheduler {
    fn name(&self) -> &'static str {
        "SM2"
    }

    fn project(
        &self,
        prior: &SchedulingFields,
        grade: Grade,
        sitdown: NaiveDate,
    ) -> Result<Projection> {
        let quality = grade.sm2_quality();
        let easiness = prior.easiness.unwrap_or(SM2_INITIAL_EASINESS);
        let repetitions = prior.repetitions.unwrap_or(0).max(0);
        let interval = prior.interval.unwrap_or(0).max(0);

        let miss = (5 - quality) as f64;
        let next_easiness = (easiness + 0.1 - miss * (0.08 + miss * 0.02)).max(SM2_MIN_EASINESS);

        let (next_repetitions, next_interval) = if quality < 3 {
            (0, 1)
        } else {
            let reps = repetitions + 1;
            let days = match reps {
                1 => 1,
                2 => 6,
                _ => ((interval.max(1) as f64) * next_easiness).round() as i64,
            };
            (reps, days)
        };

        let review_day = sitdown
            .checked_add_days(Days::new(next_interval as u64))
            .ok_or_else(|| Error::Scheduling("Projected review date out of range".to_string()))?;

        Ok(Projection {
            fields: SchedulingFields {
                quality: Some(quality),
                easiness: Some(next_easiness),
                interval: Some(next_interval),
                repetitions: Some(next_repetitions),
                ..prior.clone()
            },
            review_date: review_day.and_time(NaiveTime::MIN),
        })
    }
}

/// Scheduler lookup by playlist algorithm
#[derive(Clone)]
pub struct SchedulerRegistry {
    providers: HashMap<AlgorithmType, Arc<dyn Scheduler>>,
}

impl SchedulerRegistry {
    /// Registry with only the SM2 provider
    pub fn with_sm2() -> Self {
        let mut providers: HashMap<AlgorithmType, Arc<dyn Scheduler>> = HashMap::new();
        providers.insert(AlgorithmType::Sm2, Arc::new(Sm2Scheduler));
        Self { providers }
    }

    pub fn register(&mut self, algorithm: AlgorithmType, scheduler: Arc<dyn Scheduler>) {
        self.providers.insert(algorithm, scheduler);
    }

    pub fn get(&self, algorithm: AlgorithmType) -> Result<Arc<dyn Scheduler>> {
        self.providers.get(&algorithm).cloned().ok_or_else(|| {
            Error::Scheduling(format!("No scheduling provider registered for {}", algorithm))
        })
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::with_sm2()
    }
}
