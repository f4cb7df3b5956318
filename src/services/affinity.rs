use crate::error::Result;
use crate::models::{adjusted_tier, DEFAULT_TIER};
use crate::store::TierStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-user, per-artist tier scores.
///
/// `apply_delta` is the only primitive that changes an existing tier. It is a
/// read followed by a write, so callers must serialize it per artist (the
/// coalescer does).
#[derive(Clone)]
pub struct AffinityStore {
    store: Arc<dyn TierStore>,
}

impl AffinityStore {
    pub fn new(store: Arc<dyn TierStore>) -> Self {
        Self { store }
    }

    /// Tiers that exist for these artists. Missing entries should be read as
    /// [`DEFAULT_TIER`]. Never fails: a storage error yields an empty map.
    pub async fn get_tiers(&self, user_id: Uuid, artist_ids: &HashSet<String>) -> HashMap<String, i32> {
        if artist_ids.is_empty() {
            return HashMap::new();
        }

        let ids: Vec<String> = artist_ids.iter().cloned().collect();
        match self.store.tiers_for(user_id, &ids).await {
            Ok(rows) => rows.into_iter().map(|row| (row.artist_id, row.tier)).collect(),
            Err(e) => {
                warn!("Failed to fetch artist tiers for user {}: {:?}", user_id, e);
                HashMap::new()
            }
        }
    }

    /// Create default-tier rows for artists this user has no row for yet.
    pub async fn ensure_artists(&self, user_id: Uuid, artist_ids: &HashSet<String>) -> Result<u64> {
        if artist_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = artist_ids.iter().cloned().collect();
        let created = self.store.insert_missing(user_id, &ids, DEFAULT_TIER).await?;
        debug!("Created {} default artist tiers for user {}", created, user_id);
        Ok(created)
    }

    /// Returns the tier now stored for the artist.
    pub async fn apply_delta(&self, user_id: Uuid, artist_id: &str, delta: f64) -> Result<i32> {
        let current = self.store.tier(user_id, artist_id).await?;
        let new_tier = adjusted_tier(current.unwrap_or(DEFAULT_TIER), delta);

        self.store.upsert_tier(user_id, artist_id, new_tier).await?;

        debug!(
            "Artist {} tier {} -> {} ({:+})",
            artist_id,
            current.map(|t| t.to_string()).unwrap_or_else(|| "new".to_string()),
            new_tier,
            delta
        );
        Ok(new_tier)
    }
}
