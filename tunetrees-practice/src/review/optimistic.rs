//! Apply/compensate command for optimistic entry edits

use crate::model::QueueEntry;
use crate::snapshot::QueueSnapshotCache;
use crate::{Error, Result};

/// A local edit that has been applied ahead of server confirmation.
///
/// `compensate` puts the evaluation fields back to their pre-apply values.
/// Only those fields are restored; anything merged into the entry by other
/// operations in the meantime is left alone.
#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    item_id: i64,
    seq: u64,
    prior: QueueEntry,
}

impl OptimisticUpdate {
    pub fn apply<F>(cache: &QueueSnapshotCache, item_id: i64, seq: u64, mutate: F) -> Result<Self>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let (prior, _) = cache
            .update_entry(item_id, mutate)
            .ok_or_else(|| Error::NotFound(format!("Item {} is not in the queue", item_id)))?;

        Ok(Self {
            item_id,
            seq,
            prior,
        })
    }

    pub fn compensate(&self, cache: &QueueSnapshotCache) {
        let prior = &self.prior;
        cache.update_entry(self.item_id, |entry| {
            entry.staged_evaluation = prior.staged_evaluation.clone();
            entry.has_staged = prior.has_staged;
            entry.scheduling = prior.scheduling.clone();
        });
    }

    pub fn item_id(&self) -> i64 {
        self.item_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}
