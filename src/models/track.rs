use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// A playable catalog item. Never mutated once fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    pub name: String,
    /// First entry is the primary artist
    pub artists: Vec<ArtistRef>,
    /// Cover image URLs, preferred first
    #[serde(default)]
    pub images: Vec<String>,
}

impl Track {
    /// Id of the first listed artist, if the provider gave it one.
    pub fn primary_artist_id(&self) -> Option<&str> {
        self.artists
            .first()
            .map(|artist| artist.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn primary_artist_name(&self) -> Option<&str> {
        self.artists.first().map(|artist| artist.name.as_str())
    }

    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}
