use crate::models::Track;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Distance between consecutive durable positions; leaves room for inserts.
pub const POSITION_GAP: i64 = 100;

/// Best-effort audio attributes stored alongside a queue slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub valence: Option<f64>,
    pub tempo: Option<f64>,
}

/// One slot of a user's durable queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub user_id: Uuid,
    pub position: i64,
    pub track_id: String,
    pub track_uri: String,
    pub image_url: Option<String>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub valence: Option<f64>,
    pub tempo: Option<f64>,
}

impl QueueEntry {
    pub fn from_track(user_id: Uuid, track: &Track, position: i64) -> Self {
        Self {
            user_id,
            position,
            track_id: track.id.clone(),
            track_uri: track.uri.clone(),
            image_url: track.image_url().map(str::to_string),
            danceability: None,
            energy: None,
            valence: None,
            tempo: None,
        }
    }

    pub fn with_features(mut self, features: AudioFeatures) -> Self {
        self.danceability = features.danceability;
        self.energy = features.energy;
        self.valence = features.valence;
        self.tempo = features.tempo;
        self
    }

    pub fn cached(&self) -> CachedQueueItem {
        CachedQueueItem {
            uri: self.track_uri.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Compact projection mirrored into the fast cache for immediate rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedQueueItem {
    pub uri: String,
    pub image_url: Option<String>,
}

impl From<&Track> for CachedQueueItem {
    fn from(track: &Track) -> Self {
        CachedQueueItem {
            uri: track.uri.clone(),
            image_url: track.image_url().map(str::to_string),
        }
    }
}

/// Published whenever a user's queue changes so observers can refresh without polling
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Replaced { user_id: Uuid, length: usize },
    Appended { user_id: Uuid, position: i64 },
    Reordered { user_id: Uuid, from_position: i64, length: usize },
    Cleared { user_id: Uuid },
}

impl QueueEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            QueueEvent::Replaced { user_id, .. }
            | QueueEvent::Appended { user_id, .. }
            | QueueEvent::Reordered { user_id, .. }
            | QueueEvent::Cleared { user_id } => *user_id,
        }
    }
}
