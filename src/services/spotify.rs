use crate::error::{AppError, Result};
use crate::models::{ArtistRef, AudioFeatures, Track};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tracing::{debug, warn};

const ALBUM_PAGE_LIMIT: usize = 50;
const PLAYLIST_PAGE_LIMIT: usize = 100;
const AUDIO_FEATURES_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Album,
    Playlist,
    Artist,
    Track,
}

/// A `spotify:{kind}:{id}` reference to something playable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextUri {
    pub kind: ContextKind,
    pub id: String,
}

impl FromStr for ContextUri {
    type Err = AppError;

    fn from_str(uri: &str) -> Result<Self> {
        let mut parts = uri.split(':');
        let (scheme, kind, id) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(kind), Some(id), None) => (scheme, kind, id),
            _ => return Err(AppError::Validation(format!("Malformed context URI: {}", uri))),
        };

        if scheme != "spotify" || id.is_empty() {
            return Err(AppError::Validation(format!("Unsupported context URI: {}", uri)));
        }

        let kind = match kind {
            "album" => ContextKind::Album,
            "playlist" => ContextKind::Playlist,
            "artist" => ContextKind::Artist,
            "track" => ContextKind::Track,
            other => {
                return Err(AppError::Validation(format!("Unsupported context type: {}", other)));
            }
        };

        Ok(ContextUri { kind, id: id.to_string() })
    }
}

impl fmt::Display for ContextUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ContextKind::Album => "album",
            ContextKind::Playlist => "playlist",
            ContextKind::Artist => "artist",
            ContextKind::Track => "track",
        };
        write!(f, "spotify:{}:{}", kind, self.id)
    }
}

/// Read-only view of the streaming provider's catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Every track of the context, following pagination until exhausted
    async fn context_tracks(&self, token: &str, context: &ContextUri) -> Result<Vec<Track>>;

    async fn currently_playing(&self, token: &str) -> Result<Option<Track>>;

    async fn track(&self, token: &str, track_id: &str) -> Result<Track>;

    async fn audio_features(&self, token: &str, track_ids: &[String]) -> Result<HashMap<String, AudioFeatures>>;
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    is_playable: Option<bool>,
}

impl SpotifyTrack {
    /// `None` for local files and items the provider marks unplayable
    fn into_track(self, album_images: Option<&[String]>) -> Option<Track> {
        if self.is_playable == Some(false) {
            return None;
        }
        let id = self.id.filter(|id| !id.is_empty())?;

        let images = match album_images {
            Some(images) => images.to_vec(),
            None => self
                .album
                .map(|album| album.images.into_iter().map(|image| image.url).collect())
                .unwrap_or_default(),
        };

        Some(Track {
            id,
            uri: self.uri,
            name: self.name,
            artists: self
                .artists
                .into_iter()
                .map(|artist| ArtistRef {
                    id: artist.id.unwrap_or_default(),
                    name: artist.name,
                })
                .collect(),
            images,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    #[serde(default)]
    tracks: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    item: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAudioFeatures {
    id: String,
    danceability: Option<f64>,
    energy: Option<f64>,
    valence: Option<f64>,
    tempo: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<SpotifyAudioFeatures>>,
}

/// Follow `next` links until exhausted. A failing page stops pagination but
/// keeps everything gathered before it.
pub async fn collect_pages<T, F, Fut>(first_url: String, mut fetch: F) -> Vec<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut next = Some(first_url);
    let mut pages = 0;

    while let Some(url) = next.take() {
        match fetch(url.clone()).await {
            Ok(page) => {
                pages += 1;
                items.extend(page.items);
                next = page.next;
            }
            Err(e) => {
                warn!("Stopping pagination at {} after {} pages: {:?}", url, pages, e);
            }
        }
    }

    items
}

#[derive(Debug, Clone)]
pub struct SpotifyClient {
    base_url: String,
    client: Client,
}

impl SpotifyClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<T> {
        let response = self.get(token, url).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::Spotify(format!("Failed to parse response: {}", e)))
    }

    async fn get(&self, token: &str, url: &str) -> Result<reqwest::Response> {
        debug!("Spotify GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Spotify(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Spotify(format!(
                "API returned status: {} - {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn album_tracks(&self, token: &str, album_id: &str) -> Vec<Track> {
        // The album tracks endpoint returns simplified tracks without cover art
        let images: Vec<String> = match self
            .get_json::<SpotifyAlbum>(token, &format!("{}/albums/{}", self.base_url, album_id))
            .await
        {
            Ok(album) => album.images.into_iter().map(|image| image.url).collect(),
            Err(e) => {
                warn!("Failed to fetch album {} info: {:?}", album_id, e);
                Vec::new()
            }
        };

        let first = format!(
            "{}/albums/{}/tracks?limit={}",
            self.base_url, album_id, ALBUM_PAGE_LIMIT
        );
        let items: Vec<SpotifyTrack> =
            collect_pages(first, |url| async move { self.get_json(token, &url).await }).await;

        items
            .into_iter()
            .filter_map(|track| track.into_track(Some(images.as_slice())))
            .collect()
    }

    async fn playlist_tracks(&self, token: &str, playlist_id: &str) -> Vec<Track> {
        let first = format!(
            "{}/playlists/{}/tracks?limit={}",
            self.base_url, playlist_id, PLAYLIST_PAGE_LIMIT
        );
        let items: Vec<PlaylistItem> =
            collect_pages(first, |url| async move { self.get_json(token, &url).await }).await;

        items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(|track| track.into_track(None))
            .collect()
    }

    async fn artist_top_tracks(&self, token: &str, artist_id: &str) -> Result<Vec<Track>> {
        let top: TopTracks = self
            .get_json(token, &format!("{}/artists/{}/top-tracks", self.base_url, artist_id))
            .await?;

        Ok(top
            .tracks
            .into_iter()
            .filter_map(|track| track.into_track(None))
            .collect())
    }
}

#[async_trait]
impl Catalog for SpotifyClient {
    async fn context_tracks(&self, token: &str, context: &ContextUri) -> Result<Vec<Track>> {
        let tracks = match context.kind {
            ContextKind::Album => self.album_tracks(token, &context.id).await,
            ContextKind::Playlist => self.playlist_tracks(token, &context.id).await,
            ContextKind::Artist => self.artist_top_tracks(token, &context.id).await?,
            // A single track has no queue to build
            ContextKind::Track => Vec::new(),
        };

        debug!("Fetched {} tracks for {}", tracks.len(), context);
        Ok(tracks)
    }

    async fn currently_playing(&self, token: &str) -> Result<Option<Track>> {
        let response = self
            .get(token, &format!("{}/me/player/currently-playing", self.base_url))
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let current: CurrentlyPlaying = response
            .json()
            .await
            .map_err(|e| AppError::Spotify(format!("Failed to parse response: {}", e)))?;

        Ok(current.item.and_then(|track| track.into_track(None)))
    }

    async fn track(&self, token: &str, track_id: &str) -> Result<Track> {
        let track: SpotifyTrack = self
            .get_json(token, &format!("{}/tracks/{}", self.base_url, track_id))
            .await?;

        track
            .into_track(None)
            .ok_or_else(|| AppError::NotFound(format!("Track {} is not playable", track_id)))
    }

    async fn audio_features(&self, token: &str, track_ids: &[String]) -> Result<HashMap<String, AudioFeatures>> {
        let found = collect_batches(track_ids, AUDIO_FEATURES_BATCH, |ids| async move {
            let url = format!("{}/audio-features?ids={}", self.base_url, ids);
            let response: AudioFeaturesResponse = self.get_json(token, &url).await?;
            Ok(response.audio_features.into_iter().flatten().collect::<Vec<_>>())
        })
        .await;

        Ok(found
            .into_iter()
            .map(|f| {
                let features = AudioFeatures {
                    danceability: f.danceability,
                    energy: f.energy,
                    valence: f.valence,
                    tempo: f.tempo,
                };
                (f.id, features)
            })
            .collect())
    }
}

/// Look up `ids` in comma-joined batches of `size`. A failing batch stops the
/// remaining lookups but keeps what earlier batches returned.
pub async fn collect_batches<T, F, Fut>(ids: &[String], size: usize, mut fetch: F) -> Vec<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items = Vec::new();

    for (index, batch) in ids.chunks(size.max(1)).enumerate() {
        match fetch(batch.join(",")).await {
            Ok(found) => items.extend(found),
            Err(e) => {
                warn!("Stopping batched lookup after {} batches: {:?}", index, e);
                break;
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_context_uri() {
        let album: ContextUri = "spotify:album:4aawyAB9vmqN3uQ7FjRGTy".parse().unwrap();
        assert_eq!(album.kind, ContextKind::Album);
        assert_eq!(album.id, "4aawyAB9vmqN3uQ7FjRGTy");
        assert_eq!(album.to_string(), "spotify:album:4aawyAB9vmqN3uQ7FjRGTy");

        assert_eq!("spotify:playlist:p1".parse::<ContextUri>().unwrap().kind, ContextKind::Playlist);
        assert_eq!("spotify:artist:a1".parse::<ContextUri>().unwrap().kind, ContextKind::Artist);
        assert_eq!("spotify:track:t1".parse::<ContextUri>().unwrap().kind, ContextKind::Track);

        for bad in ["", "spotify:album", "spotify:album:", "spotify:show:x", "other:album:x", "spotify:album:x:y"] {
            assert!(bad.parse::<ContextUri>().is_err(), "{} should not parse", bad);
        }
    }

    #[tokio::test]
    async fn test_collect_pages_follows_next_links() {
        let pages = collect_pages("page-1".to_string(), |url| async move {
            let page = match url.as_str() {
                "page-1" => Page { items: vec![1, 2], next: Some("page-2".to_string()) },
                "page-2" => Page { items: vec![3], next: Some("page-3".to_string()) },
                _ => Page { items: vec![4, 5], next: None },
            };
            Ok(page)
        })
        .await;

        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_collect_pages_keeps_items_before_failure() {
        let calls = AtomicUsize::new(0);
        let items = collect_pages("page-1".to_string(), |url| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match url.as_str() {
                    "page-1" => Ok(Page { items: vec!["a", "b"], next: Some("page-2".to_string()) }),
                    _ => Err(AppError::Spotify("502".to_string())),
                }
            }
        })
        .await;

        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_playlist_page_filters_missing_and_unplayable_tracks() {
        let json = r#"{
            "items": [
                {"track": {"id": "t1", "uri": "spotify:track:t1", "name": "One",
                           "artists": [{"id": "a1", "name": "Artist"}],
                           "album": {"images": [{"url": "https://img/large"}, {"url": "https://img/small"}]}}},
                {"track": null},
                {"track": {"id": null, "uri": "spotify:local:x", "name": "Local", "artists": []}},
                {"track": {"id": "t2", "uri": "spotify:track:t2", "name": "Two", "artists": [], "is_playable": false}}
            ],
            "next": null
        }"#;
        let page: Page<PlaylistItem> = serde_json::from_str(json).unwrap();
        assert!(page.next.is_none());

        let tracks: Vec<Track> = page
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(|track| track.into_track(None))
            .collect();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].primary_artist_id(), Some("a1"));
        assert_eq!(tracks[0].image_url(), Some("https://img/large"));
    }

    #[test]
    fn test_album_tracks_take_album_images() {
        let json = r#"{"id": "t1", "uri": "spotify:track:t1", "name": "One",
                       "artists": [{"id": "a1", "name": "Artist"}, {"id": "a2", "name": "Guest"}]}"#;
        let track: SpotifyTrack = serde_json::from_str(json).unwrap();
        let images = vec!["https://img/cover".to_string()];

        let track = track.into_track(Some(images.as_slice())).unwrap();
        assert_eq!(track.images, images);
        assert_eq!(track.artists.len(), 2);
        assert_eq!(track.primary_artist_name(), Some("Artist"));
    }

    #[tokio::test]
    async fn test_collect_batches_keeps_results_before_failure() {
        let ids: Vec<String> = (0..5).map(|i| format!("t{}", i)).collect();
        let calls = AtomicUsize::new(0);

        let found = collect_batches(&ids, 2, |joined| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match call {
                    0 => Ok(joined.split(',').map(str::to_string).collect()),
                    _ => Err(AppError::Spotify("429".to_string())),
                }
            }
        })
        .await;

        assert_eq!(found, vec!["t0".to_string(), "t1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_audio_features_response_skips_nulls() {
        let json = r#"{"audio_features": [
            {"id": "t1", "danceability": 0.5, "energy": 0.8, "valence": 0.1, "tempo": 128.0},
            null
        ]}"#;
        let response: AudioFeaturesResponse = serde_json::from_str(json).unwrap();
        let present: Vec<_> = response.audio_features.into_iter().flatten().collect();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].tempo, Some(128.0));
    }
}
