//! Spotify Web API client

use super::{
    CatalogArtist, CatalogAudioFeatures, CatalogClient, CatalogError, CatalogTrack, PlaybackQueue,
    PlaybackState,
};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const SPOTIFY_BASE_URL: &str = "https://api.spotify.com/v1";
const USER_AGENT: &str = concat!("shufl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TracksResponse {
    tracks: Vec<Option<CatalogTrack>>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<CatalogAudioFeatures>>,
}

#[derive(Debug, Deserialize)]
struct ArtistsResponse {
    artists: Vec<Option<CatalogArtist>>,
}

/// Spotify Web API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SpotifyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<T, CatalogError> {
        let url = self.url(path);
        debug!(url = %url, "Querying catalog API");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(credential)
            .query(query)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }

    async fn post_empty(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<(), CatalogError> {
        let url = self.url(path);
        debug!(url = %url, "Posting to catalog API");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(credential)
            .query(query)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }
}

/// Map non-success statuses onto [`CatalogError`]
async fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(CatalogError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(CatalogError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn joined(ids: &[String]) -> String {
    ids.join(",")
}

#[async_trait]
impl CatalogClient for SpotifyClient {
    async fn get_tracks(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogTrack>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response: TracksResponse = self
            .get_json("/tracks", &[("ids", joined(ids))], credential)
            .await?;
        Ok(response.tracks.into_iter().flatten().collect())
    }

    async fn get_audio_features(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogAudioFeatures>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response: AudioFeaturesResponse = self
            .get_json("/audio-features", &[("ids", joined(ids))], credential)
            .await?;
        Ok(response.audio_features.into_iter().flatten().collect())
    }

    async fn get_artists(
        &self,
        ids: &[String],
        credential: &str,
    ) -> Result<Vec<CatalogArtist>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response: ArtistsResponse = self
            .get_json("/artists", &[("ids", joined(ids))], credential)
            .await?;
        Ok(response.artists.into_iter().flatten().collect())
    }

    async fn get_playback_state(
        &self,
        credential: &str,
    ) -> Result<Option<PlaybackState>, CatalogError> {
        let url = self.url("/me/player");
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        // 204: no active device
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let response = check_status(response).await?;
        let state = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        Ok(Some(state))
    }

    async fn get_playback_queue(&self, credential: &str) -> Result<PlaybackQueue, CatalogError> {
        self.get_json("/me/player/queue", &[], credential).await
    }

    async fn push_to_queue(&self, credential: &str, uri: &str) -> Result<(), CatalogError> {
        self.post_empty("/me/player/queue", &[("uri", uri.to_string())], credential)
            .await
    }

    async fn skip_next(&self, credential: &str) -> Result<(), CatalogError> {
        self.post_empty("/me/player/next", &[], credential).await
    }
}
