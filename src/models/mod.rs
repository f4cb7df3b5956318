pub mod playback;
pub mod queue;
pub mod requests;
pub mod tier;
pub mod track;

pub use playback::{Classification, PlaybackOutcome, PlaybackSample, TrackEnd};
pub use queue::{AudioFeatures, CachedQueueItem, QueueEntry, QueueEvent, POSITION_GAP};
pub use requests::{EnqueueTrackRequest, LoadQueueRequest, PlaybackSampleRequest, TrackStartedRequest};
pub use tier::{adjusted_tier, ArtistTier, DEFAULT_TIER, MAX_TIER, MIN_TIER};
pub use track::{ArtistRef, Track};
