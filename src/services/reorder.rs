use crate::error::Result;
use crate::models::{QueueEntry, QueueEvent, POSITION_GAP};
use crate::services::persistence::QueuePersistence;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reshuffle after every this many started tracks
pub const REORDER_PERIOD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReorderOutcome {
    /// Index is not a reorder boundary
    NotDue,
    /// Boundary reached but nothing beyond the buffer
    EmptyTail,
    Reordered { from_position: i64, length: usize },
    Failed { reason: String },
}

pub fn is_reorder_boundary(index: usize) -> bool {
    index > 0 && index % REORDER_PERIOD == 0
}

/// Entries strictly above this position form the reorderable tail.
/// `None` when the index has no position.
pub fn tail_threshold(index: usize) -> Option<i64> {
    i64::try_from(index).ok()?.checked_add(2)?.checked_mul(POSITION_GAP)
}

/// First position handed out when the tail is reinserted
pub fn tail_start(index: usize) -> Option<i64> {
    i64::try_from(index).ok()?.checked_add(3)?.checked_mul(POSITION_GAP)
}

/// Keeps long queues fresh by shuffling the unplayed tail, leaving the
/// just-started track and the next two untouched.
#[derive(Clone)]
pub struct QueueReorderScheduler {
    persistence: QueuePersistence,
}

impl QueueReorderScheduler {
    pub fn new(persistence: QueuePersistence) -> Self {
        Self { persistence }
    }

    /// Called with the 0-based index of the track that just started.
    /// Failures are logged and reported in the outcome, never retried.
    pub async fn on_track_started(&self, user_id: Uuid, index: usize) -> ReorderOutcome {
        if !is_reorder_boundary(index) {
            return ReorderOutcome::NotDue;
        }

        let (Some(threshold), Some(start)) = (tail_threshold(index), tail_start(index)) else {
            warn!("Track index {} is out of range for user {}", index, user_id);
            return ReorderOutcome::Failed {
                reason: format!("track index {} is out of range", index),
            };
        };

        match self.reorder_tail(user_id, threshold, start).await {
            Ok(0) => {
                debug!("Nothing to reorder past index {} for user {}", index, user_id);
                ReorderOutcome::EmptyTail
            }
            Ok(length) => ReorderOutcome::Reordered {
                from_position: start,
                length,
            },
            Err(e) => {
                error!("Failed to reorder queue for user {}: {:?}", user_id, e);
                ReorderOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    async fn reorder_tail(&self, user_id: Uuid, threshold: i64, start: i64) -> Result<usize> {
        let store = self.persistence.store();

        let mut tail = store.entries_after(user_id, threshold).await?;
        if tail.is_empty() {
            return Ok(0);
        }

        tail.shuffle(&mut rand::thread_rng());

        let reordered: Vec<QueueEntry> = tail
            .into_iter()
            .enumerate()
            .map(|(offset, entry)| QueueEntry {
                position: start + offset as i64 * POSITION_GAP,
                ..entry
            })
            .collect();

        store.replace_after(user_id, threshold, &reordered).await?;
        info!("Reordered {} remaining tracks in queue for user {}", reordered.len(), user_id);

        // The mirror is rebuilt wholesale; a stale mirror only lags
        if let Err(e) = self.persistence.refresh_cache(user_id).await {
            debug!("Queue cache left stale after reorder: {:?}", e);
        }
        self.persistence.publish(QueueEvent::Reordered {
            user_id,
            from_position: start,
            length: reordered.len(),
        });

        Ok(reordered.len())
    }
}
