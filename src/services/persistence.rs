use crate::error::{AppError, Result};
use crate::models::{AudioFeatures, CachedQueueItem, QueueEntry, QueueEvent, Track, POSITION_GAP};
use crate::store::{QueueCache, QueueStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Writes queues to the durable table and mirrors them into the fast cache.
#[derive(Clone)]
pub struct QueuePersistence {
    store: Arc<dyn QueueStore>,
    cache: Arc<dyn QueueCache>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueuePersistence {
    pub fn new(store: Arc<dyn QueueStore>, cache: Arc<dyn QueueCache>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { store, cache, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Replace the user's whole queue with `tracks` at positions 0, 100, 200, ...
    ///
    /// The durable write is all-or-nothing; on failure nothing is mirrored and
    /// no event is published.
    pub async fn replace_queue(
        &self,
        user_id: Uuid,
        tracks: &[Track],
        features: &HashMap<String, AudioFeatures>,
    ) -> Result<()> {
        let entries: Vec<QueueEntry> = tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                let entry = QueueEntry::from_track(user_id, track, index as i64 * POSITION_GAP);
                match features.get(&track.id) {
                    Some(f) => entry.with_features(*f),
                    None => entry,
                }
            })
            .collect();

        self.store
            .replace_all(user_id, &entries)
            .await
            .map_err(|e| AppError::QueueWrite(format!("replacing queue for user {}: {}", user_id, e)))?;

        let mirror: Vec<CachedQueueItem> = tracks.iter().map(CachedQueueItem::from).collect();
        self.cache.write(user_id, &mirror).await?;

        info!("Stored queue of {} tracks for user {}", entries.len(), user_id);
        self.publish(QueueEvent::Replaced {
            user_id,
            length: entries.len(),
        });
        Ok(())
    }

    /// Insert one entry without touching the rest of the queue.
    pub async fn append_one(&self, user_id: Uuid, track: &Track, position: i64) -> Result<QueueEntry> {
        let entry = QueueEntry::from_track(user_id, track, position);
        self.store.insert_entry(&entry).await?;

        info!("Track {} added to queue at position {}", track.id, position);
        self.publish(QueueEvent::Appended { user_id, position });
        Ok(entry)
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<()> {
        let removed = self.store.delete_all(user_id).await?;
        self.cache.clear(user_id).await?;

        info!("Cleared {} queue entries for user {}", removed, user_id);
        self.publish(QueueEvent::Cleared { user_id });
        Ok(())
    }

    pub async fn entries(&self, user_id: Uuid) -> Result<Vec<QueueEntry>> {
        self.store.entries(user_id).await
    }

    pub async fn cached(&self, user_id: Uuid) -> Result<Vec<CachedQueueItem>> {
        self.cache.read(user_id).await
    }

    /// Next free position after the last entry
    pub async fn next_position(&self, user_id: Uuid) -> Result<i64> {
        let entries = self.store.entries(user_id).await?;
        Ok(entries
            .last()
            .map(|entry| entry.position + POSITION_GAP)
            .unwrap_or(0))
    }

    /// Rebuild the cache mirror from the durable queue
    pub async fn refresh_cache(&self, user_id: Uuid) -> Result<()> {
        let entries = self.store.entries(user_id).await?;
        let mirror: Vec<CachedQueueItem> = entries.iter().map(QueueEntry::cached).collect();
        if let Err(e) = self.cache.write(user_id, &mirror).await {
            warn!("Failed to refresh queue cache for user {}: {:?}", user_id, e);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtistRef;
    use crate::store::{MemoryQueueCache, MemoryStore};

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            uri: format!("spotify:track:{}", id),
            name: id.to_string(),
            artists: vec![ArtistRef { id: "a".to_string(), name: "A".to_string() }],
            images: if id == "C" { vec![] } else { vec![format!("https://img/{}", id)] },
        }
    }

    fn setup() -> (Arc<MemoryStore>, QueuePersistence) {
        let store = Arc::new(MemoryStore::new());
        let persistence = QueuePersistence::new(store.clone(), Arc::new(MemoryQueueCache::new()));
        (store, persistence)
    }

    #[tokio::test]
    async fn test_replace_queue_round_trip() {
        let (_, persistence) = setup();
        let mut events = persistence.subscribe();
        let user = Uuid::new_v4();
        let tracks = vec![track("A"), track("B"), track("C")];

        persistence.replace_queue(user, &tracks, &HashMap::new()).await.unwrap();

        let entries = persistence.entries(user).await.unwrap();
        let stored: Vec<_> = entries.iter().map(|e| (e.track_id.as_str(), e.position)).collect();
        assert_eq!(stored, vec![("A", 0), ("B", 100), ("C", 200)]);

        let cached = persistence.cached(user).await.unwrap();
        assert_eq!(
            cached,
            vec![
                CachedQueueItem { uri: "spotify:track:A".to_string(), image_url: Some("https://img/A".to_string()) },
                CachedQueueItem { uri: "spotify:track:B".to_string(), image_url: Some("https://img/B".to_string()) },
                CachedQueueItem { uri: "spotify:track:C".to_string(), image_url: None },
            ]
        );

        assert_eq!(events.recv().await.unwrap(), QueueEvent::Replaced { user_id: user, length: 3 });
    }

    #[tokio::test]
    async fn test_replace_queue_overwrites_previous_queue() {
        let (_, persistence) = setup();
        let user = Uuid::new_v4();

        persistence.replace_queue(user, &[track("A"), track("B")], &HashMap::new()).await.unwrap();
        persistence.replace_queue(user, &[track("C")], &HashMap::new()).await.unwrap();

        let entries = persistence.entries(user).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].track_id, "C");
        assert_eq!(persistence.cached(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_queue_stores_audio_features() {
        let (_, persistence) = setup();
        let user = Uuid::new_v4();
        let features = HashMap::from([(
            "B".to_string(),
            AudioFeatures { danceability: Some(0.7), energy: Some(0.4), valence: None, tempo: Some(121.0) },
        )]);

        persistence.replace_queue(user, &[track("A"), track("B")], &features).await.unwrap();

        let entries = persistence.entries(user).await.unwrap();
        assert_eq!(entries[0].energy, None);
        assert_eq!(entries[1].danceability, Some(0.7));
        assert_eq!(entries[1].tempo, Some(121.0));
    }

    #[tokio::test]
    async fn test_failed_replace_reports_error_and_keeps_old_queue() {
        let (store, persistence) = setup();
        let mut events = persistence.subscribe();
        let user = Uuid::new_v4();
        persistence.replace_queue(user, &[track("A")], &HashMap::new()).await.unwrap();
        let _ = events.recv().await;

        store.set_fail_writes(true);
        let result = persistence.replace_queue(user, &[track("B"), track("C")], &HashMap::new()).await;
        assert!(matches!(result, Err(AppError::QueueWrite(_))));

        store.set_fail_writes(false);
        let entries = persistence.entries(user).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].track_id, "A");
        assert_eq!(persistence.cached(user).await.unwrap()[0].uri, "spotify:track:A");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_append_one_leaves_existing_rows() {
        let (_, persistence) = setup();
        let user = Uuid::new_v4();
        persistence.replace_queue(user, &[track("A"), track("B")], &HashMap::new()).await.unwrap();

        assert_eq!(persistence.next_position(user).await.unwrap(), 200);
        persistence.append_one(user, &track("X"), 150).await.unwrap();

        let ids: Vec<_> = persistence
            .entries(user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.track_id, e.position))
            .collect();
        assert_eq!(
            ids,
            vec![("A".to_string(), 0), ("B".to_string(), 100), ("X".to_string(), 150)]
        );

        // Taken positions are rejected
        assert!(persistence.append_one(user, &track("Y"), 150).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_empties_queue_and_cache() {
        let (_, persistence) = setup();
        let mut events = persistence.subscribe();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        persistence.replace_queue(user, &[track("A")], &HashMap::new()).await.unwrap();
        persistence.replace_queue(other, &[track("B")], &HashMap::new()).await.unwrap();

        persistence.clear(user).await.unwrap();

        assert!(persistence.entries(user).await.unwrap().is_empty());
        assert!(persistence.cached(user).await.unwrap().is_empty());
        assert_eq!(persistence.entries(other).await.unwrap().len(), 1);

        let _ = events.recv().await;
        let _ = events.recv().await;
        assert_eq!(events.recv().await.unwrap(), QueueEvent::Cleared { user_id: user });
    }
}
