use crate::error::{AppError, Result};
use crate::models::{ArtistTier, QueueEntry};
use crate::store::{QueueStore, TierStore};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

/// Rows per INSERT statement; keeps bind parameters well under the Postgres limit
const INSERT_CHUNK: usize = 1000;

const ENTRY_COLUMNS: &str =
    "user_id, position, track_id, track_uri, image_url, danceability, energy, valence, tempo";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_entries(tx: &mut Transaction<'_, Postgres>, entries: &[QueueEntry]) -> Result<()> {
        for chunk in entries.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO queues ({}) ", ENTRY_COLUMNS));
            qb.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.user_id)
                    .push_bind(entry.position)
                    .push_bind(&entry.track_id)
                    .push_bind(&entry.track_uri)
                    .push_bind(&entry.image_url)
                    .push_bind(entry.danceability)
                    .push_bind(entry.energy)
                    .push_bind(entry.valence)
                    .push_bind(entry.tempo);
            });
            qb.build()
                .execute(&mut **tx)
                .await
                .map_err(|e| AppError::QueueWrite(format!("bulk insert of {} entries failed: {}", chunk.len(), e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for PgStore {
    async fn tiers_for(&self, user_id: Uuid, artist_ids: &[String]) -> Result<Vec<ArtistTier>> {
        let rows = sqlx::query_as::<_, ArtistTier>(
            "SELECT user_id, artist_id, tier FROM user_artist_tiers
             WHERE user_id = $1 AND artist_id = ANY($2)",
        )
        .bind(user_id)
        .bind(artist_ids)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    async fn tier(&self, user_id: Uuid, artist_id: &str) -> Result<Option<i32>> {
        let tier = sqlx::query_scalar(
            "SELECT tier FROM user_artist_tiers WHERE user_id = $1 AND artist_id = $2",
        )
        .bind(user_id)
        .bind(artist_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(tier)
    }

    async fn insert_missing(&self, user_id: Uuid, artist_ids: &[String], tier: i32) -> Result<u64> {
        if artist_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "INSERT INTO user_artist_tiers (user_id, artist_id, tier)
             SELECT $1, artist_id, $3 FROM UNNEST($2::text[]) AS artist_id
             ON CONFLICT (user_id, artist_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(artist_ids)
        .bind(tier)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_tier(&self, user_id: Uuid, artist_id: &str, tier: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_artist_tiers (user_id, artist_id, tier, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (user_id, artist_id) DO UPDATE SET tier = $3, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(artist_id)
        .bind(tier)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn entries(&self, user_id: Uuid) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {} FROM queues WHERE user_id = $1 ORDER BY position ASC",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    async fn entries_after(&self, user_id: Uuid, position: i64) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {} FROM queues WHERE user_id = $1 AND position > $2 ORDER BY position ASC",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .bind(position)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    async fn replace_all(&self, user_id: Uuid, entries: &[QueueEntry]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM queues WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        // Dropping the transaction on error rolls the delete back
        Self::insert_entries(&mut tx, entries).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_after(&self, user_id: Uuid, position: i64, entries: &[QueueEntry]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM queues WHERE user_id = $1 AND position > $2")
            .bind(user_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;

        Self::insert_entries(&mut tx, entries).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO queues ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            ENTRY_COLUMNS
        ))
        .bind(entry.user_id)
        .bind(entry.position)
        .bind(&entry.track_id)
        .bind(&entry.track_uri)
        .bind(&entry.image_url)
        .bind(entry.danceability)
        .bind(entry.energy)
        .bind(entry.valence)
        .bind(entry.tempo)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn delete_all(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queues WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
