//! Debounced tier updates.
//!
//! Playback produces bursts of small score signals (skip after skip). Each
//! (user, artist) pair gets one pending accumulator with one flush timer; a new
//! delta cancels the timer, merges into the accumulator and restarts it. When
//! the timer expires the summed delta is written with a single `apply_delta`.

use crate::services::affinity::AffinityStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

type PendingKey = (Uuid, String);

struct PendingDelta {
    accumulated: f64,
    generation: u64,
    timer: JoinHandle<()>,
}

/// Result of one flushed accumulator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierFlush {
    pub user_id: Uuid,
    pub artist_id: String,
    pub delta: f64,
    /// New tier on success, error message otherwise
    pub result: Result<i32, String>,
}

struct Inner {
    affinity: AffinityStore,
    debounce: Duration,
    pending: Mutex<HashMap<PendingKey, PendingDelta>>,
    /// Held across `apply_delta`; a later flush of the same key waits for the write in progress
    writing: Mutex<HashMap<PendingKey, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
    flush_tx: broadcast::Sender<TierFlush>,
}

#[derive(Clone)]
pub struct TierUpdateCoalescer {
    inner: Arc<Inner>,
}

impl TierUpdateCoalescer {
    pub fn new(affinity: AffinityStore, debounce: Duration) -> Self {
        let (flush_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                affinity,
                debounce,
                pending: Mutex::new(HashMap::new()),
                writing: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                flush_tx,
            }),
        }
    }

    /// Receive every flush outcome, successful or not
    pub fn subscribe(&self) -> broadcast::Receiver<TierFlush> {
        self.inner.flush_tx.subscribe()
    }

    pub async fn schedule_delta(&self, user_id: Uuid, artist_id: &str, delta: f64) {
        let key: PendingKey = (user_id, artist_id.to_string());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);

        // Holding the lock across spawn + insert keeps the new timer from
        // observing the map before its own entry is in place
        let mut pending = self.inner.pending.lock().await;
        let accumulated = match pending.remove(&key) {
            Some(existing) => {
                existing.timer.abort();
                existing.accumulated + delta
            }
            None => delta,
        };

        let inner = self.inner.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;

            let due = {
                let mut pending = inner.pending.lock().await;
                match pending.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&timer_key).map(|entry| entry.accumulated)
                    }
                    _ => None,
                }
            };

            if let Some(delta) = due {
                inner.flush(timer_key, delta).await;
            }
        });

        debug!(
            "Pending tier delta for artist {} is now {:+}",
            artist_id, accumulated
        );
        pending.insert(
            key,
            PendingDelta {
                accumulated,
                generation,
                timer,
            },
        );
    }

    /// Cancel every pending timer and write all accumulators now.
    pub async fn flush_all(&self) -> Vec<TierFlush> {
        let drained: Vec<(PendingKey, PendingDelta)> = {
            let mut pending = self.inner.pending.lock().await;
            pending.drain().collect()
        };

        let mut flushed = Vec::with_capacity(drained.len());
        for (key, entry) in drained {
            entry.timer.abort();
            flushed.push(self.inner.flush(key, entry.accumulated).await);
        }
        flushed
    }

    pub async fn pending_delta(&self, user_id: Uuid, artist_id: &str) -> Option<f64> {
        let pending = self.inner.pending.lock().await;
        pending
            .get(&(user_id, artist_id.to_string()))
            .map(|entry| entry.accumulated)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

impl Inner {
    async fn flush(&self, key: PendingKey, delta: f64) -> TierFlush {
        let gate = self.writing.lock().await.entry(key.clone()).or_default().clone();
        let guard = gate.lock().await;

        let (user_id, artist_id) = &key;
        // Never retried: a lost update must not reach the playback path
        let result = match self.affinity.apply_delta(*user_id, artist_id, delta).await {
            Ok(tier) => Ok(tier),
            Err(e) => {
                error!("Failed to update tier for artist {}: {:?}", artist_id, e);
                Err(e.to_string())
            }
        };
        drop(guard);

        {
            // Drop the gate once no other flush of this key holds or awaits it
            let mut writing = self.writing.lock().await;
            if writing.get(&key).is_some_and(|g| Arc::strong_count(g) == 2) {
                writing.remove(&key);
            }
        }
        drop(gate);
        let (user_id, artist_id) = key;

        let flush = TierFlush {
            user_id,
            artist_id,
            delta,
            result,
        };
        let _ = self.flush_tx.send(flush.clone());
        flush
    }
}
