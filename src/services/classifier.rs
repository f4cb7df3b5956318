//! Turns playback observations into tier deltas.

use crate::models::{Classification, PlaybackOutcome, PlaybackSample, TrackEnd};
use serde::Serialize;

/// Skips at or before this position are early skips
pub const EARLY_SKIP_MS: u64 = 10_000;
/// Skips within this distance of the end are late skips
pub const LATE_SKIP_MS: u64 = 10_000;
pub const DEFAULT_NEAR_END_MS: u64 = 1_500;

pub const COMPLETE_DELTA: f64 = 1.0;
pub const EARLY_SKIP_DELTA: f64 = -2.0;
pub const LATE_SKIP_DELTA: f64 = -0.5;
pub const REGULAR_SKIP_DELTA: f64 = -1.0;

pub fn classify(position_ms: u64, duration_ms: u64, end: TrackEnd) -> Classification {
    let (delta, outcome) = match end {
        TrackEnd::Natural => (COMPLETE_DELTA, PlaybackOutcome::Complete),
        TrackEnd::Skipped if position_ms <= EARLY_SKIP_MS => {
            (EARLY_SKIP_DELTA, PlaybackOutcome::EarlySkip)
        }
        TrackEnd::Skipped if position_ms >= duration_ms.saturating_sub(LATE_SKIP_MS) => {
            (LATE_SKIP_DELTA, PlaybackOutcome::LateSkip)
        }
        TrackEnd::Skipped => (REGULAR_SKIP_DELTA, PlaybackOutcome::RegularSkip),
    };

    Classification { delta, outcome }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PlayingMid,
    /// Natural completion already reported for this track identity
    EndingLatched,
}

/// A finished track and how it finished
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackTransition {
    pub track_id: String,
    pub primary_artist_id: Option<String>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub classification: Classification,
}

#[derive(Debug, Clone)]
struct CurrentTrack {
    track_id: String,
    primary_artist_id: Option<String>,
    position_ms: u64,
    duration_ms: u64,
    state: SessionState,
}

/// Tracks the current playback session for one listener.
///
/// Repeated near-end samples for the same track produce one completion; a
/// change of track identity before the latch closes is reported as a skip at
/// the last observed position.
#[derive(Debug, Clone)]
pub struct TrackSession {
    near_end_ms: u64,
    current: Option<CurrentTrack>,
}

impl Default for TrackSession {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_END_MS)
    }
}

impl TrackSession {
    pub fn new(near_end_ms: u64) -> Self {
        Self {
            near_end_ms,
            current: None,
        }
    }

    pub fn state(&self) -> Option<SessionState> {
        self.current.as_ref().map(|current| current.state)
    }

    pub fn current_track_id(&self) -> Option<&str> {
        self.current.as_ref().map(|current| current.track_id.as_str())
    }

    pub fn observe(&mut self, sample: &PlaybackSample) -> Vec<TrackTransition> {
        let mut transitions = Vec::new();

        match self.current.as_mut() {
            Some(current) if current.track_id == sample.track_id => {
                current.position_ms = sample.position_ms;
                current.duration_ms = sample.duration_ms;
                if current.primary_artist_id.is_none() {
                    current.primary_artist_id = sample.primary_artist_id.clone();
                }
            }
            _ => {
                if let Some(previous) = self.current.take() {
                    if previous.state == SessionState::PlayingMid {
                        transitions.push(TrackTransition {
                            classification: classify(
                                previous.position_ms,
                                previous.duration_ms,
                                TrackEnd::Skipped,
                            ),
                            track_id: previous.track_id,
                            primary_artist_id: previous.primary_artist_id,
                            position_ms: previous.position_ms,
                            duration_ms: previous.duration_ms,
                        });
                    }
                }
                self.current = Some(CurrentTrack {
                    track_id: sample.track_id.clone(),
                    primary_artist_id: sample.primary_artist_id.clone(),
                    position_ms: sample.position_ms,
                    duration_ms: sample.duration_ms,
                    state: SessionState::PlayingMid,
                });
            }
        }

        let near_end_ms = self.near_end_ms;
        if let Some(current) = self.current.as_mut() {
            let near_end = current.duration_ms > 0
                && current.position_ms.saturating_add(near_end_ms) >= current.duration_ms;

            if current.state == SessionState::PlayingMid && sample.is_playing && near_end {
                current.state = SessionState::EndingLatched;
                transitions.push(TrackTransition {
                    track_id: current.track_id.clone(),
                    primary_artist_id: current.primary_artist_id.clone(),
                    position_ms: current.position_ms,
                    duration_ms: current.duration_ms,
                    classification: classify(current.position_ms, current.duration_ms, TrackEnd::Natural),
                });
            }
        }

        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(track_id: &str, position_ms: u64, duration_ms: u64, is_playing: bool) -> PlaybackSample {
        PlaybackSample {
            track_id: track_id.to_string(),
            primary_artist_id: Some(format!("artist-{}", track_id)),
            position_ms,
            duration_ms,
            is_playing,
        }
    }

    #[test]
    fn test_classify_skip_windows() {
        let early = classify(5_000, 200_000, TrackEnd::Skipped);
        assert_eq!((early.delta, early.outcome.label()), (-2.0, "early"));

        let late = classify(195_000, 200_000, TrackEnd::Skipped);
        assert_eq!((late.delta, late.outcome.label()), (-0.5, "late"));

        let regular = classify(100_000, 200_000, TrackEnd::Skipped);
        assert_eq!((regular.delta, regular.outcome.label()), (-1.0, "regular"));
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(10_000, 200_000, TrackEnd::Skipped).outcome, PlaybackOutcome::EarlySkip);
        assert_eq!(classify(10_001, 200_000, TrackEnd::Skipped).outcome, PlaybackOutcome::RegularSkip);
        assert_eq!(classify(190_000, 200_000, TrackEnd::Skipped).outcome, PlaybackOutcome::LateSkip);
        assert_eq!(classify(189_999, 200_000, TrackEnd::Skipped).outcome, PlaybackOutcome::RegularSkip);
        // A very short track: the early window wins
        assert_eq!(classify(8_000, 9_000, TrackEnd::Skipped).outcome, PlaybackOutcome::EarlySkip);
    }

    #[test]
    fn test_natural_completion_ignores_position() {
        for position in [0, 5_000, 100_000, 199_000] {
            let c = classify(position, 200_000, TrackEnd::Natural);
            assert_eq!((c.delta, c.outcome.label()), (1.0, "complete"));
        }
    }

    #[test]
    fn test_near_end_latches_once_per_track() {
        let mut session = TrackSession::new(1_500);
        assert!(session.observe(&sample("t1", 1_000, 200_000, true)).is_empty());
        assert_eq!(session.state(), Some(SessionState::PlayingMid));

        let completed = session.observe(&sample("t1", 199_000, 200_000, true));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].classification.outcome, PlaybackOutcome::Complete);
        assert_eq!(completed[0].primary_artist_id.as_deref(), Some("artist-t1"));
        assert_eq!(session.state(), Some(SessionState::EndingLatched));

        // The polling timer keeps firing near the end
        assert!(session.observe(&sample("t1", 199_800, 200_000, true)).is_empty());
        assert!(session.observe(&sample("t1", 200_000, 200_000, true)).is_empty());

        // Moving on after a completion is not a skip
        assert!(session.observe(&sample("t2", 0, 180_000, true)).is_empty());
        assert_eq!(session.current_track_id(), Some("t2"));
        assert_eq!(session.state(), Some(SessionState::PlayingMid));
    }

    #[test]
    fn test_identity_change_mid_track_is_a_skip() {
        let mut session = TrackSession::default();
        session.observe(&sample("t1", 3_000, 200_000, true));
        session.observe(&sample("t1", 4_000, 200_000, true));

        let skipped = session.observe(&sample("t2", 0, 180_000, true));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].track_id, "t1");
        assert_eq!(skipped[0].position_ms, 4_000);
        assert_eq!(skipped[0].classification.outcome, PlaybackOutcome::EarlySkip);
    }

    #[test]
    fn test_paused_near_end_does_not_latch() {
        let mut session = TrackSession::default();
        assert!(session.observe(&sample("t1", 199_500, 200_000, false)).is_empty());
        assert_eq!(session.state(), Some(SessionState::PlayingMid));

        let resumed = session.observe(&sample("t1", 199_600, 200_000, true));
        assert_eq!(resumed.len(), 1);
    }

    #[test]
    fn test_returning_to_a_track_starts_a_new_session() {
        let mut session = TrackSession::default();
        session.observe(&sample("t1", 199_000, 200_000, true));
        session.observe(&sample("t2", 50_000, 200_000, true));

        // Back to t1: latch was reset by the identity change
        let events = session.observe(&sample("t1", 199_500, 200_000, true));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].track_id, "t2");
        assert_eq!(events[0].classification.outcome, PlaybackOutcome::RegularSkip);
        assert_eq!(events[1].track_id, "t1");
        assert_eq!(events[1].classification.outcome, PlaybackOutcome::Complete);
    }
}
