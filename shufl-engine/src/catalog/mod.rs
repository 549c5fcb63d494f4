//! External music catalog and playback API
//!
//! The engine talks to the catalog only through [`CatalogClient`]. Batched
//! lookups return whatever subset of the requested IDs the catalog knows;
//! unknown IDs are silently absent from the result.

pub mod spotify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use spotify::SpotifyClient;

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transport failure (DNS, connect, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429
    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// HTTP 401, credential expired or revoked
    #[error("Credential rejected by catalog")]
    Unauthorized,

    /// Any other non-success response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Artist credit on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: Option<String>,
    pub name: String,
}

/// Track metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub popularity: i64,
    pub preview_url: Option<String>,
    pub uri: String,
}

/// Audio-feature vector for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAudioFeatures {
    pub id: String,
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub tempo: f64,
    pub instrumentalness: f64,
    pub acousticness: f64,
    pub liveness: f64,
    pub speechiness: f64,
    pub loudness: f64,
    pub key: i32,
    pub mode: i32,
    pub time_signature: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Item in the external player (track or episode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackItem {
    pub id: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub duration_ms: i64,
}

/// Current external playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playing: bool,
    pub progress_ms: Option<i64>,
    pub item: Option<PlaybackItem>,
}

impl PlaybackState {
    /// Fraction of the current item already played, if known
    pub fn progress_fraction(&self) -> Option<f64> {
        let item = self.item.as_ref()?;
        let progress = self.progress_ms?;
        if item.duration_ms <= 0 {
            return None;
        }
        Some(progress as f64 / item.duration_ms as f64)
    }
}

/// External "up next" queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackQueue {
    pub currently_playing: Option<PlaybackItem>,
    #[serde(default)]
    pub queue: Vec<PlaybackItem>,
}

impl PlaybackQueue {
    pub fn depth(&self) -> usize {
        self.queue.len()
    }
}

/// Catalog URI for a track ID
pub fn track_uri(catalog_id: &str) -> String {
    format!("spotify:track:{}", catalog_id)
}

/// External catalog and playback API.
///
/// Batched methods accept any number of IDs; callers chunk to the API's
/// batch limit.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_tracks(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogTrack>, CatalogError>;

    async fn get_audio_features(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogAudioFeatures>, CatalogError>;

    async fn get_artists(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogArtist>, CatalogError>;

    /// None when nothing is playing
    async fn get_playback_state(
        &self,
        credential: &str,
    ) -> Result<Option<PlaybackState>, CatalogError>;

    async fn get_playback_queue(&self, credential: &str) -> Result<PlaybackQueue, CatalogError>;

    async fn push_to_queue(&self, credential: &str, uri: &str) -> Result<(), CatalogError>;

    async fn skip_next(&self, credential: &str) -> Result<(), CatalogError>;
}
