use crate::error::{AppError, Result};
use crate::models::{ArtistTier, CachedQueueItem, QueueEntry};
use crate::store::{QueueCache, QueueStore, TierStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process tier and queue tables.
///
/// Failures can be switched on to exercise degraded paths; a failing write
/// leaves the tables untouched, like a rolled-back transaction.
#[derive(Default)]
pub struct MemoryStore {
    tiers: RwLock<HashMap<(Uuid, String), i32>>,
    queues: RwLock<HashMap<Uuid, BTreeMap<i64, QueueEntry>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    tier_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of single-row tier writes performed so far
    pub fn tier_writes(&self) -> usize {
        self.tier_writes.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("memory store: read failure injected")));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::QueueWrite("memory store: write failure injected".to_string()));
        }
        Ok(())
    }

    fn check_unique(entries: &[QueueEntry]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in entries {
            if !seen.insert(entry.position) {
                return Err(AppError::QueueWrite(format!(
                    "duplicate position {} for user {}",
                    entry.position, entry.user_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for MemoryStore {
    async fn tiers_for(&self, user_id: Uuid, artist_ids: &[String]) -> Result<Vec<ArtistTier>> {
        self.check_read()?;
        let tiers = self.tiers.read().await;
        Ok(artist_ids
            .iter()
            .filter_map(|artist_id| {
                tiers.get(&(user_id, artist_id.clone())).map(|tier| ArtistTier {
                    user_id,
                    artist_id: artist_id.clone(),
                    tier: *tier,
                })
            })
            .collect())
    }

    async fn tier(&self, user_id: Uuid, artist_id: &str) -> Result<Option<i32>> {
        self.check_read()?;
        let tiers = self.tiers.read().await;
        Ok(tiers.get(&(user_id, artist_id.to_string())).copied())
    }

    async fn insert_missing(&self, user_id: Uuid, artist_ids: &[String], tier: i32) -> Result<u64> {
        self.check_write()?;
        let mut tiers = self.tiers.write().await;
        let mut created = 0;
        for artist_id in artist_ids {
            if let std::collections::hash_map::Entry::Vacant(slot) = tiers.entry((user_id, artist_id.clone())) {
                slot.insert(tier);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn upsert_tier(&self, user_id: Uuid, artist_id: &str, tier: i32) -> Result<()> {
        self.check_write()?;
        self.tier_writes.fetch_add(1, Ordering::SeqCst);
        self.tiers.write().await.insert((user_id, artist_id.to_string()), tier);
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn entries(&self, user_id: Uuid) -> Result<Vec<QueueEntry>> {
        self.check_read()?;
        let queues = self.queues.read().await;
        Ok(queues
            .get(&user_id)
            .map(|queue| queue.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn entries_after(&self, user_id: Uuid, position: i64) -> Result<Vec<QueueEntry>> {
        self.check_read()?;
        let queues = self.queues.read().await;
        Ok(queues
            .get(&user_id)
            .map(|queue| {
                queue
                    .range(position.saturating_add(1)..)
                    .map(|(_, entry)| entry.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replace_all(&self, user_id: Uuid, entries: &[QueueEntry]) -> Result<()> {
        self.check_write()?;
        Self::check_unique(entries)?;
        let mut queues = self.queues.write().await;
        let queue = entries.iter().map(|e| (e.position, e.clone())).collect();
        queues.insert(user_id, queue);
        Ok(())
    }

    async fn replace_after(&self, user_id: Uuid, position: i64, entries: &[QueueEntry]) -> Result<()> {
        self.check_write()?;
        Self::check_unique(entries)?;
        let mut queues = self.queues.write().await;
        let queue = queues.entry(user_id).or_default();

        let kept: BTreeMap<i64, QueueEntry> = queue
            .range(..=position)
            .map(|(p, e)| (*p, e.clone()))
            .collect();
        if entries.iter().any(|e| kept.contains_key(&e.position)) {
            return Err(AppError::QueueWrite(format!(
                "replacement overlaps kept positions at or below {}",
                position
            )));
        }

        *queue = kept;
        for entry in entries {
            queue.insert(entry.position, entry.clone());
        }
        Ok(())
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.check_write()?;
        let mut queues = self.queues.write().await;
        let queue = queues.entry(entry.user_id).or_default();
        if queue.contains_key(&entry.position) {
            return Err(AppError::QueueWrite(format!(
                "position {} already taken for user {}",
                entry.position, entry.user_id
            )));
        }
        queue.insert(entry.position, entry.clone());
        Ok(())
    }

    async fn delete_all(&self, user_id: Uuid) -> Result<u64> {
        self.check_write()?;
        let removed = self.queues.write().await.remove(&user_id);
        Ok(removed.map(|queue| queue.len() as u64).unwrap_or(0))
    }
}

#[derive(Default)]
pub struct MemoryQueueCache {
    items: RwLock<HashMap<Uuid, String>>,
}

impl MemoryQueueCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueCache for MemoryQueueCache {
    async fn write(&self, user_id: Uuid, items: &[CachedQueueItem]) -> Result<()> {
        let payload = serde_json::to_string(items)?;
        self.items.write().await.insert(user_id, payload);
        Ok(())
    }

    async fn read(&self, user_id: Uuid) -> Result<Vec<CachedQueueItem>> {
        match self.items.read().await.get(&user_id) {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn clear(&self, user_id: Uuid) -> Result<()> {
        self.items.write().await.remove(&user_id);
        Ok(())
    }
}
