//! Storage seams used by the engine.
//!
//! Each trait covers one remote resource: the affinity table, the durable queue
//! table and the fast cache mirror. Postgres/Redis back them in production, the
//! memory implementations back tests and local runs.

pub mod memory;
pub mod postgres;
pub mod redis_cache;

use crate::error::Result;
use crate::models::{ArtistTier, CachedQueueItem, QueueEntry};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::{MemoryQueueCache, MemoryStore};
pub use postgres::PgStore;
pub use redis_cache::RedisQueueCache;

#[async_trait]
pub trait TierStore: Send + Sync {
    /// Rows that exist for these artists. Unknown artists are simply absent.
    async fn tiers_for(&self, user_id: Uuid, artist_ids: &[String]) -> Result<Vec<ArtistTier>>;

    async fn tier(&self, user_id: Uuid, artist_id: &str) -> Result<Option<i32>>;

    /// Bulk-insert rows for artists that have none yet. Existing rows keep their tier.
    /// Returns the number of rows created.
    async fn insert_missing(&self, user_id: Uuid, artist_ids: &[String], tier: i32) -> Result<u64>;

    async fn upsert_tier(&self, user_id: Uuid, artist_id: &str, tier: i32) -> Result<()>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// All entries for the user, ascending by position
    async fn entries(&self, user_id: Uuid) -> Result<Vec<QueueEntry>>;

    /// Entries strictly after `position`, ascending
    async fn entries_after(&self, user_id: Uuid, position: i64) -> Result<Vec<QueueEntry>>;

    /// Delete every entry for the user and insert `entries`, all or nothing.
    async fn replace_all(&self, user_id: Uuid, entries: &[QueueEntry]) -> Result<()>;

    /// Delete entries strictly after `position` and insert `entries`, all or nothing.
    async fn replace_after(&self, user_id: Uuid, position: i64, entries: &[QueueEntry]) -> Result<()>;

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<()>;

    async fn delete_all(&self, user_id: Uuid) -> Result<u64>;
}

/// Write-whole / read-whole mirror of the queue
#[async_trait]
pub trait QueueCache: Send + Sync {
    async fn write(&self, user_id: Uuid, items: &[CachedQueueItem]) -> Result<()>;

    async fn read(&self, user_id: Uuid) -> Result<Vec<CachedQueueItem>>;

    async fn clear(&self, user_id: Uuid) -> Result<()>;
}
