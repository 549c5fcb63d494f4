//! # Shufl Engine
//!
//! Personalized shuffle queue engine:
//! - **enrichment**: concurrent catalog fan-out that caches track metadata,
//!   audio features and artist genres
//! - **scoring** / **queue**: preference-weighted ranking of a user's library
//! - **session**: per-user live sessions that keep an external playback
//!   queue topped up from the ranked sequence
//!
//! [`ShuflEngine`] wires the SQLite stores, catalog client and credential
//! provider into the components above.

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod library;
pub mod models;
pub mod preferences;
pub mod queue;
pub mod scoring;
pub mod session;

pub use error::{Error, Result};

use catalog::CatalogClient;
use config::EngineConfig;
use credentials::CredentialProvider;
use db::{
    PreferenceStore, SqlitePreferenceStore, SqliteTrackCache, SqliteUserLibrary, TrackCache,
    UserLibraryStore,
};
use enrichment::{BatchSizes, EnrichmentPipeline};
use library::LibraryService;
use queue::QueueGenerator;
use session::SessionManager;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared engine components
#[derive(Clone)]
pub struct ShuflEngine {
    pub config: EngineConfig,
    pub tracks: Arc<dyn TrackCache>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub library_store: Arc<dyn UserLibraryStore>,
    pub enrichment: Arc<EnrichmentPipeline>,
    pub generator: Arc<QueueGenerator>,
    pub library: Arc<LibraryService>,
    pub sessions: Arc<SessionManager>,
}

impl ShuflEngine {
    /// Build the engine on SQLite stores backed by `pool`
    pub fn new(
        config: EngineConfig,
        pool: SqlitePool,
        catalog: Arc<dyn CatalogClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let tracks: Arc<dyn TrackCache> = Arc::new(SqliteTrackCache::new(pool.clone()));
        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(SqlitePreferenceStore::new(pool.clone()));
        let library_store: Arc<dyn UserLibraryStore> = Arc::new(SqliteUserLibrary::new(pool));

        Self::from_parts(config, tracks, preferences, library_store, catalog, credentials)
    }

    /// Build the engine on caller-supplied stores
    pub fn from_parts(
        config: EngineConfig,
        tracks: Arc<dyn TrackCache>,
        preferences: Arc<dyn PreferenceStore>,
        library_store: Arc<dyn UserLibraryStore>,
        catalog: Arc<dyn CatalogClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let enrichment = Arc::new(EnrichmentPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&tracks),
            BatchSizes::from(&config.catalog),
        ));

        let generator = Arc::new(QueueGenerator::new(
            Arc::clone(&tracks),
            Arc::clone(&preferences),
            &config.scoring,
            &config.cache,
        ));

        let library = Arc::new(LibraryService::new(
            Arc::clone(&library_store),
            Arc::clone(&tracks),
            Arc::clone(&enrichment),
            config.cache.clone(),
            config.catalog.track_batch_size,
        ));

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&generator),
            Arc::clone(&enrichment),
            Arc::clone(&library),
            Arc::clone(&preferences),
            catalog,
            credentials,
            config.session.clone(),
            config.cache.clone(),
        ));

        Self {
            config,
            tracks,
            preferences,
            library_store,
            enrichment,
            generator,
            library,
            sessions,
        }
    }
}
