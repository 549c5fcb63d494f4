//! Scripted in-memory catalog
//!
//! Holds tracks, audio features and artists keyed by ID, simulates an
//! external player queue, and counts every call. Individual endpoints can
//! be switched to fail.

use async_trait::async_trait;
use shufl_engine::catalog::{
    track_uri, AlbumRef, ArtistRef, CatalogArtist, CatalogAudioFeatures, CatalogClient,
    CatalogError, CatalogTrack, PlaybackItem, PlaybackQueue, PlaybackState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct MockState {
    tracks: HashMap<String, CatalogTrack>,
    features: HashMap<String, CatalogAudioFeatures>,
    artists: HashMap<String, CatalogArtist>,
    fail_tracks: bool,
    fail_features: bool,
    fail_artists: bool,
    fail_queue_read: bool,
    fail_playback: bool,
    /// Pushes allowed before every further push fails
    push_budget: Option<usize>,
    playback: Option<PlaybackState>,
    /// Playback-state reads for these credentials wait until released
    playback_gates: HashMap<String, Arc<Notify>>,
    queue: Vec<PlaybackItem>,
    pushed: Vec<String>,
    skips: usize,
    calls: HashMap<&'static str, usize>,
    batch_sizes: HashMap<&'static str, Vec<usize>>,
}

#[derive(Default)]
pub struct MockCatalog {
    state: Mutex<MockState>,
}

pub fn features_for(id: &str, danceability: f64, energy: f64, tempo: f64) -> CatalogAudioFeatures {
    CatalogAudioFeatures {
        id: id.to_string(),
        danceability,
        energy,
        valence: 0.5,
        tempo,
        instrumentalness: 0.0,
        acousticness: 0.2,
        liveness: 0.1,
        speechiness: 0.05,
        loudness: -6.0,
        key: 7,
        mode: 1,
        time_signature: 4,
    }
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track credited to `artist_ids`, with optional features
    pub fn add_track(&self, id: &str, artist_ids: &[&str], features: Option<CatalogAudioFeatures>) {
        let track = CatalogTrack {
            id: id.to_string(),
            name: format!("Song {}", id),
            artists: artist_ids
                .iter()
                .map(|a| ArtistRef {
                    id: Some(a.to_string()),
                    name: format!("Artist {}", a),
                })
                .collect(),
            album: Some(AlbumRef {
                id: Some(format!("album-{}", id)),
                name: format!("Album {}", id),
            }),
            duration_ms: 200_000,
            popularity: 50,
            preview_url: Some(format!("https://p.scdn.co/mp3-preview/{}", id)),
            uri: track_uri(id),
        };

        let mut state = self.state.lock().unwrap();
        state.tracks.insert(id.to_string(), track);
        if let Some(features) = features {
            state.features.insert(id.to_string(), features);
        }
    }

    pub fn add_artist(&self, id: &str, genres: &[&str]) {
        self.state.lock().unwrap().artists.insert(
            id.to_string(),
            CatalogArtist {
                id: id.to_string(),
                name: format!("Artist {}", id),
                genres: genres.iter().map(|g| g.to_string()).collect(),
            },
        );
    }

    pub fn fail_tracks(&self, fail: bool) {
        self.state.lock().unwrap().fail_tracks = fail;
    }

    pub fn fail_features(&self, fail: bool) {
        self.state.lock().unwrap().fail_features = fail;
    }

    pub fn fail_artists(&self, fail: bool) {
        self.state.lock().unwrap().fail_artists = fail;
    }

    pub fn fail_queue_read(&self, fail: bool) {
        self.state.lock().unwrap().fail_queue_read = fail;
    }

    pub fn fail_playback(&self, fail: bool) {
        self.state.lock().unwrap().fail_playback = fail;
    }

    /// Allow `count` more successful pushes; None removes the limit
    pub fn set_push_budget(&self, count: Option<usize>) {
        self.state.lock().unwrap().push_budget = count;
    }

    /// Replace the external queue with `depth` unrelated items
    pub fn set_queue_depth(&self, depth: usize) {
        self.state.lock().unwrap().queue = (0..depth)
            .map(|i| PlaybackItem {
                id: Some(format!("external-{}", i)),
                uri: track_uri(&format!("external-{}", i)),
                duration_ms: 180_000,
            })
            .collect();
    }

    pub fn set_playing(&self, id: &str, progress_ms: i64, duration_ms: i64) {
        self.state.lock().unwrap().playback = Some(PlaybackState {
            is_playing: true,
            progress_ms: Some(progress_ms),
            item: Some(PlaybackItem {
                id: Some(id.to_string()),
                uri: track_uri(id),
                duration_ms,
            }),
        });
    }

    /// Stall playback-state reads made with `credential`
    pub fn hold_playback(&self, credential: &str) {
        self.state
            .lock()
            .unwrap()
            .playback_gates
            .insert(credential.to_string(), Arc::new(Notify::new()));
    }

    /// Let a stalled read for `credential` continue, and stop stalling
    pub fn release_playback(&self, credential: &str) {
        if let Some(gate) = self.state.lock().unwrap().playback_gates.remove(credential) {
            gate.notify_one();
        }
    }

    pub fn stop_playback(&self) {
        self.state.lock().unwrap().playback = None;
    }

    /// Catalog IDs pushed so far, in order
    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn clear_pushed(&self) {
        self.state.lock().unwrap().pushed.clear();
    }

    pub fn skips(&self) -> usize {
        self.state.lock().unwrap().skips
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Sizes of every batched request made to `endpoint`
    pub fn batch_sizes(&self, endpoint: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .batch_sizes
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_lookups(&self) -> usize {
        self.calls("tracks") + self.calls("audio_features") + self.calls("artists")
    }

    fn record(&self, endpoint: &'static str, batch: Option<usize>) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(endpoint).or_default() += 1;
        if let Some(size) = batch {
            state.batch_sizes.entry(endpoint).or_default().push(size);
        }
        state
    }
}

fn unavailable() -> CatalogError {
    CatalogError::Api {
        status: 503,
        body: "scripted failure".to_string(),
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn get_tracks(
        &self,
        ids: &[String],
        _credential: &str,
    ) -> Result<Vec<CatalogTrack>, CatalogError> {
        let state = self.record("tracks", Some(ids.len()));
        if state.fail_tracks {
            return Err(unavailable());
        }
        Ok(ids.iter().filter_map(|id| state.tracks.get(id).cloned()).collect())
    }

    async fn get_audio_features(
        &self,
        ids: &[String],
        _credential: &str,
    ) -> Result<Vec<CatalogAudioFeatures>, CatalogError> {
        let state = self.record("audio_features", Some(ids.len()));
        if state.fail_features {
            return Err(CatalogError::RateLimited { retry_after: Some(1) });
        }
        Ok(ids.iter().filter_map(|id| state.features.get(id).cloned()).collect())
    }

    async fn get_artists(
        &self,
        ids: &[String],
        _credential: &str,
    ) -> Result<Vec<CatalogArtist>, CatalogError> {
        let state = self.record("artists", Some(ids.len()));
        if state.fail_artists {
            return Err(unavailable());
        }
        Ok(ids.iter().filter_map(|id| state.artists.get(id).cloned()).collect())
    }

    async fn get_playback_state(
        &self,
        credential: &str,
    ) -> Result<Option<PlaybackState>, CatalogError> {
        let gate = self
            .record("playback_state", None)
            .playback_gates
            .get(credential)
            .cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        if state.fail_playback {
            return Err(CatalogError::Network("connection reset".to_string()));
        }
        Ok(state.playback.clone())
    }

    async fn get_playback_queue(&self, _credential: &str) -> Result<PlaybackQueue, CatalogError> {
        let state = self.record("playback_queue", None);
        if state.fail_queue_read {
            return Err(unavailable());
        }
        Ok(PlaybackQueue {
            currently_playing: state.playback.as_ref().and_then(|p| p.item.clone()),
            queue: state.queue.clone(),
        })
    }

    async fn push_to_queue(&self, _credential: &str, uri: &str) -> Result<(), CatalogError> {
        let mut state = self.record("push", None);
        if let Some(budget) = state.push_budget {
            if budget == 0 {
                return Err(unavailable());
            }
            state.push_budget = Some(budget - 1);
        }

        let id = uri.trim_start_matches("spotify:track:").to_string();
        state.queue.push(PlaybackItem {
            id: Some(id.clone()),
            uri: uri.to_string(),
            duration_ms: 200_000,
        });
        state.pushed.push(id);
        Ok(())
    }

    async fn skip_next(&self, _credential: &str) -> Result<(), CatalogError> {
        let mut state = self.record("skip", None);
        if !state.queue.is_empty() {
            state.queue.remove(0);
        }
        state.skips += 1;
        Ok(())
    }
}
