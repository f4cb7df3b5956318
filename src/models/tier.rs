use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const MIN_TIER: i32 = 0;
pub const MAX_TIER: i32 = 10;
/// Tier assumed for an artist the user has never been scored on
pub const DEFAULT_TIER: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ArtistTier {
    pub user_id: Uuid,
    pub artist_id: String,
    pub tier: i32,
}

/// `clamp(round(current + delta), 0, 10)`.
///
/// Rounding happens once per call, so the order deltas are applied in matters:
/// two late skips (-0.5 each) applied one at a time leave a tier of 5 at 5
/// (4.5 rounds back up), while the same two coalesced into -1.0 move it to 4.
pub fn adjusted_tier(current: i32, delta: f64) -> i32 {
    let raw = (current as f64 + delta).round();
    raw.clamp(MIN_TIER as f64, MAX_TIER as f64) as i32
}
