//! Engine and library fixtures backed by in-memory SQLite

use super::mock_catalog::MockCatalog;
use chrono::{DateTime, Utc};
use shufl_common::db::init_memory_database;
use shufl_engine::config::EngineConfig;
use shufl_engine::credentials::StaticCredentials;
use shufl_engine::models::{AudioFeatures, EnrichedTrack};
use shufl_engine::ShuflEngine;
use std::sync::Arc;

pub const USER: &str = "alice";
pub const TOKEN: &str = "token-alice";

/// Defaults with no waits and no refresh before sessions
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.session.clear_skip_delay_ms = 0;
    config.session.monitor_interval_secs = 1;
    config.cache.refresh_on_session_start = false;
    config
}

pub struct TestEngine {
    pub engine: ShuflEngine,
    pub catalog: Arc<MockCatalog>,
    pub credentials: Arc<StaticCredentials>,
}

pub async fn create_test_engine() -> TestEngine {
    create_test_engine_with(test_config()).await
}

pub async fn create_test_engine_with(config: EngineConfig) -> TestEngine {
    let pool = init_memory_database().await.unwrap();
    let catalog = Arc::new(MockCatalog::new());
    let credentials = Arc::new(StaticCredentials::with_token(USER, TOKEN));
    let engine = ShuflEngine::new(config, pool, catalog.clone(), credentials.clone());

    TestEngine {
        engine,
        catalog,
        credentials,
    }
}

pub fn features(danceability: f64, energy: f64, tempo: f64) -> AudioFeatures {
    AudioFeatures {
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

pub fn track(id: &str, audio_features: Option<AudioFeatures>, refreshed: DateTime<Utc>) -> EnrichedTrack {
    EnrichedTrack {
        catalog_id: id.to_string(),
        title: format!("Cached {}", id),
        artists: vec!["Cached Artist".to_string()],
        artist_ids: vec!["cached-artist".to_string()],
        album: Some("Cached Album".to_string()),
        album_id: Some("cached-album".to_string()),
        duration_ms: 200_000,
        popularity: 30,
        preview_url: None,
        uri: format!("spotify:track:{}", id),
        genres: vec!["pop".to_string()],
        audio_features,
        last_refreshed: refreshed,
    }
}

/// Put a track in the cache and in the user's library
pub async fn seed_track(engine: &ShuflEngine, user: &str, track: &EnrichedTrack) {
    engine.tracks.upsert(track).await.unwrap();
    engine
        .library_store
        .add_tracks(user, &[track.catalog_id.clone()])
        .await
        .unwrap();
}

/// Seed `count` fresh tracks `t00`, `t01`, ... with the given danceability
pub async fn seed_uniform_library(engine: &ShuflEngine, user: &str, count: usize, danceability: f64) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("t{:02}", i);
        seed_track(engine, user, &track(&id, Some(features(danceability, 0.5, 120.0)), Utc::now())).await;
        ids.push(id);
    }
    ids
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
