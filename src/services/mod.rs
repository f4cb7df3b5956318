pub mod affinity;
pub mod auth;
pub mod classifier;
pub mod coalescer;
pub mod persistence;
pub mod queue_builder;
pub mod queue_engine;
pub mod reorder;
pub mod spotify;

pub use affinity::AffinityStore;
pub use auth::AuthService;
pub use classifier::{classify, TrackSession, TrackTransition};
pub use coalescer::{TierFlush, TierUpdateCoalescer};
pub use persistence::QueuePersistence;
pub use queue_builder::QueueBuilder;
pub use queue_engine::{EngineConfig, LoadSummary, QueueEngine};
pub use reorder::{QueueReorderScheduler, ReorderOutcome};
pub use spotify::{Catalog, ContextUri, SpotifyClient};
