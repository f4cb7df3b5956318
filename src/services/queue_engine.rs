use crate::error::Result;
use crate::models::{CachedQueueItem, PlaybackSample, QueueEntry, QueueEvent};
use crate::services::affinity::AffinityStore;
use crate::services::classifier::{TrackSession, TrackTransition, DEFAULT_NEAR_END_MS};
use crate::services::coalescer::{TierFlush, TierUpdateCoalescer, DEFAULT_DEBOUNCE};
use crate::services::persistence::QueuePersistence;
use crate::services::queue_builder::{primary_artist_ids, QueueBuilder};
use crate::services::reorder::{QueueReorderScheduler, ReorderOutcome};
use crate::services::spotify::{Catalog, ContextKind, ContextUri};
use crate::store::{QueueCache, QueueStore, TierStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tier_debounce: Duration,
    pub near_end_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier_debounce: DEFAULT_DEBOUNCE,
            near_end_ms: DEFAULT_NEAR_END_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub context: String,
    pub tracks: usize,
    /// Uri of the currently playing track when it was pinned to the front
    pub pinned: Option<String>,
}

/// Ties catalog, affinity scores and queue storage together for each user.
#[derive(Clone)]
pub struct QueueEngine {
    catalog: Arc<dyn Catalog>,
    affinity: AffinityStore,
    builder: QueueBuilder,
    persistence: QueuePersistence,
    reorder: QueueReorderScheduler,
    coalescer: TierUpdateCoalescer,
    /// Map of user_id -> current playback session
    sessions: Arc<RwLock<HashMap<Uuid, TrackSession>>>,
    near_end_ms: u64,
}

impl QueueEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        tiers: Arc<dyn TierStore>,
        queues: Arc<dyn QueueStore>,
        cache: Arc<dyn QueueCache>,
        config: EngineConfig,
    ) -> Self {
        let affinity = AffinityStore::new(tiers);
        let persistence = QueuePersistence::new(queues, cache);

        Self {
            catalog,
            builder: QueueBuilder::new(affinity.clone()),
            reorder: QueueReorderScheduler::new(persistence.clone()),
            coalescer: TierUpdateCoalescer::new(affinity.clone(), config.tier_debounce),
            affinity,
            persistence,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            near_end_ms: config.near_end_ms,
        }
    }

    /// Build and store a fresh queue for the context the user just started.
    pub async fn load_context(&self, user_id: Uuid, token: &str, context_uri: &str) -> Result<LoadSummary> {
        let context: ContextUri = context_uri.parse()?;

        if context.kind == ContextKind::Track {
            // No queue to load for single tracks
            self.persistence.clear(user_id).await?;
            return Ok(LoadSummary {
                context: context.to_string(),
                tracks: 0,
                pinned: None,
            });
        }

        let currently_playing = match self.catalog.currently_playing(token).await {
            Ok(track) => track.map(|t| t.uri),
            Err(e) => {
                debug!("Continuing without currently playing track: {:?}", e);
                None
            }
        };

        let tracks = match self.catalog.context_tracks(token, &context).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("Failed to fetch tracks for {}: {:?}", context, e);
                Vec::new()
            }
        };

        let ordered = self
            .builder
            .build(user_id, tracks, currently_playing.as_deref())
            .await;

        if ordered.is_empty() {
            self.persistence.clear(user_id).await?;
            return Ok(LoadSummary {
                context: context.to_string(),
                tracks: 0,
                pinned: None,
            });
        }

        if let Err(e) = self
            .affinity
            .ensure_artists(user_id, &primary_artist_ids(&ordered))
            .await
        {
            warn!("Failed to add artists to tiers: {:?}", e);
        }

        let track_ids: Vec<String> = ordered.iter().map(|t| t.id.clone()).collect();
        let features = match self.catalog.audio_features(token, &track_ids).await {
            Ok(features) => features,
            Err(e) => {
                debug!("Audio features unavailable: {:?}", e);
                HashMap::new()
            }
        };

        self.persistence
            .replace_queue(user_id, &ordered, &features)
            .await?;

        let pinned = currently_playing.filter(|uri| ordered[0].uri == *uri);
        info!(
            "Loaded {} tracks from {} for user {}",
            ordered.len(),
            context,
            user_id
        );

        Ok(LoadSummary {
            context: context.to_string(),
            tracks: ordered.len(),
            pinned,
        })
    }

    /// Queue one track outside a full rebuild, after the last entry unless a position is given.
    pub async fn enqueue_track(
        &self,
        user_id: Uuid,
        token: &str,
        track_id: &str,
        position: Option<i64>,
    ) -> Result<QueueEntry> {
        let track = self.catalog.track(token, track_id).await?;
        let position = match position {
            Some(position) => position,
            None => self.persistence.next_position(user_id).await?,
        };

        self.persistence.append_one(user_id, &track, position).await
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<()> {
        self.sessions.write().await.remove(&user_id);
        self.persistence.clear(user_id).await
    }

    /// Feed one playback observation; finished tracks are scored.
    pub async fn record_sample(&self, user_id: Uuid, sample: &PlaybackSample) -> Vec<TrackTransition> {
        let transitions = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(user_id)
                .or_insert_with(|| TrackSession::new(self.near_end_ms))
                .observe(sample)
        };

        for transition in &transitions {
            let Some(artist_id) = transition.primary_artist_id.as_deref() else {
                debug!("Track {} has no primary artist, not scoring", transition.track_id);
                continue;
            };

            let progress = if transition.duration_ms > 0 {
                transition.position_ms.saturating_mul(100) / transition.duration_ms
            } else {
                0
            };
            info!(
                "Track {} finished: {} ({}%), artist {} {:+}",
                transition.track_id,
                transition.classification.outcome.label(),
                progress,
                artist_id,
                transition.classification.delta
            );

            self.coalescer
                .schedule_delta(user_id, artist_id, transition.classification.delta)
                .await;
        }

        transitions
    }

    /// The caller tracks the play cursor; `index` is the track that just began.
    pub async fn track_started(&self, user_id: Uuid, index: usize) -> ReorderOutcome {
        self.reorder.on_track_started(user_id, index).await
    }

    pub async fn queue(&self, user_id: Uuid) -> Result<Vec<QueueEntry>> {
        self.persistence.entries(user_id).await
    }

    pub async fn cached_queue(&self, user_id: Uuid) -> Result<Vec<CachedQueueItem>> {
        self.persistence.cached(user_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.persistence.subscribe()
    }

    pub fn subscribe_tier_updates(&self) -> broadcast::Receiver<TierFlush> {
        self.coalescer.subscribe()
    }

    /// Write out pending tier deltas, e.g. before shutdown
    pub async fn flush_tiers(&self) -> Vec<TierFlush> {
        self.coalescer.flush_all().await
    }
}
