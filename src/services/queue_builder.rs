//! Affinity-weighted queue ordering.
//!
//! Strategy:
//! 1. Deduplicate by track id (first occurrence wins)
//! 2. Weight each track by its primary artist's tier, clamped to [1, 10]
//! 3. Draw tracks one at a time, proportionally to weight, without replacement
//! 4. Move the currently playing track (if any) to the front

use crate::models::{Track, DEFAULT_TIER};
use crate::services::affinity::AffinityStore;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

pub const MIN_WEIGHT: u32 = 1;
pub const MAX_WEIGHT: u32 = 10;
/// Tracks without a primary artist compete at the floor, not at the default tier
pub const UNATTRIBUTED_WEIGHT: u32 = 1;

#[derive(Clone)]
pub struct QueueBuilder {
    affinity: AffinityStore,
}

impl QueueBuilder {
    pub fn new(affinity: AffinityStore) -> Self {
        Self { affinity }
    }

    /// Build the play queue for `tracks`, pinning `currently_playing_uri` to the front.
    pub async fn build(
        &self,
        user_id: Uuid,
        tracks: Vec<Track>,
        currently_playing_uri: Option<&str>,
    ) -> Vec<Track> {
        let tracks = dedupe_tracks(tracks);
        if tracks.is_empty() {
            return Vec::new();
        }

        let artist_ids = primary_artist_ids(&tracks);
        let tiers = self.affinity.get_tiers(user_id, &artist_ids).await;
        debug!(
            "Resolved {} of {} artist tiers for {} tracks",
            tiers.len(),
            artist_ids.len(),
            tracks.len()
        );

        let mut rng = rand::thread_rng();
        let mut ordered = weighted_order(tracks, &tiers, &mut rng);
        if let Some(uri) = currently_playing_uri {
            pin_to_front(&mut ordered, uri);
        }

        info!("Built weighted queue of {} tracks", ordered.len());
        ordered
    }
}

/// Drop repeated track ids, keeping the first occurrence in input order.
pub fn dedupe_tracks(tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.id.clone()))
        .collect()
}

pub fn primary_artist_ids(tracks: &[Track]) -> HashSet<String> {
    tracks
        .iter()
        .filter_map(|track| track.primary_artist_id().map(str::to_string))
        .collect()
}

pub fn track_weight(track: &Track, tiers: &HashMap<String, i32>) -> u32 {
    match track.primary_artist_id() {
        Some(artist_id) => {
            let tier = tiers.get(artist_id).copied().unwrap_or(DEFAULT_TIER);
            (tier.max(0) as u32).clamp(MIN_WEIGHT, MAX_WEIGHT)
        }
        None => UNATTRIBUTED_WEIGHT,
    }
}

/// Weighted random sampling without replacement.
///
/// Each round draws a value in `[0, total)` over the remaining pool and walks
/// it in a fixed order, subtracting weights until the draw goes non-positive.
pub fn weighted_order<R: Rng + ?Sized>(
    tracks: Vec<Track>,
    tiers: &HashMap<String, i32>,
    rng: &mut R,
) -> Vec<Track> {
    let mut pool: Vec<(u32, Track)> = tracks
        .into_iter()
        .map(|track| (track_weight(&track, tiers), track))
        .collect();
    let mut ordered = Vec::with_capacity(pool.len());

    while !pool.is_empty() {
        let total: u32 = pool.iter().map(|(weight, _)| *weight).sum();
        let mut draw = rng.gen_range(0.0..total as f64);

        // Float residue can leave the draw barely positive after the last track
        let mut selected = pool.len() - 1;
        for (index, (weight, _)) in pool.iter().enumerate() {
            draw -= *weight as f64;
            if draw <= 0.0 {
                selected = index;
                break;
            }
        }

        // `remove` keeps the enumeration order of the remaining pool fixed
        let (_, track) = pool.remove(selected);
        ordered.push(track);
    }

    ordered
}

/// Move the track with `uri` to index 0. A no-op when it is absent.
pub fn pin_to_front(tracks: &mut Vec<Track>, uri: &str) {
    if let Some(index) = tracks.iter().position(|track| track.uri == uri) {
        let track = tracks.remove(index);
        debug!("Pinned currently playing track '{}' to position 0", track.name);
        tracks.insert(0, track);
    }
}
