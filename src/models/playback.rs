use serde::{Deserialize, Serialize};

/// One observation from the playback position feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSample {
    pub track_id: String,
    pub primary_artist_id: Option<String>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
}

/// Why a track stopped advancing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEnd {
    Natural,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOutcome {
    Complete,
    EarlySkip,
    LateSkip,
    RegularSkip,
}

impl PlaybackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackOutcome::Complete => "complete",
            PlaybackOutcome::EarlySkip => "early",
            PlaybackOutcome::LateSkip => "late",
            PlaybackOutcome::RegularSkip => "regular",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub delta: f64,
    pub outcome: PlaybackOutcome,
}
