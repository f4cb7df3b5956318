use crate::models::PlaybackSample;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoadQueueRequest {
    #[validate(length(min = 1))]
    pub context_uri: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueTrackRequest {
    #[validate(length(min = 1))]
    pub track_id: String,
    #[validate(range(min = 0))]
    pub position: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaybackSampleRequest {
    #[validate(length(min = 1))]
    pub track_id: String,
    pub primary_artist_id: Option<String>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
}

impl From<PlaybackSampleRequest> for PlaybackSample {
    fn from(req: PlaybackSampleRequest) -> Self {
        Self {
            track_id: req.track_id,
            primary_artist_id: req.primary_artist_id.filter(|id| !id.is_empty()),
            position_ms: req.position_ms,
            duration_ms: req.duration_ms,
            is_playing: req.is_playing,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackStartedRequest {
    /// 0-based index of the track that just began
    pub index: usize,
}
