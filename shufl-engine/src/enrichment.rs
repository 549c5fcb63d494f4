//! Library enrichment pipeline
//!
//! A batch of catalog IDs is enriched by two concurrent branches:
//!
//! - metadata: track lookups, then artist lookups for the artist IDs the
//!   track lookups returned (genres hang off artists, not tracks)
//! - audio features: independent of metadata, starts immediately
//!
//! Every lookup is chunked at the catalog's batch limit and the chunks run
//! concurrently. Results are merged into a working map keyed by catalog ID.
//! A record is written only if its metadata arrived; a missing feature
//! vector or genre set leaves that field empty. Failures are collected per
//! chunk and never cancel sibling fetches.

use crate::catalog::{CatalogArtist, CatalogAudioFeatures, CatalogClient, CatalogError, CatalogTrack};
use crate::config::CatalogConfig;
use crate::db::TrackCache;
use crate::error::{Error, Result};
use crate::models::{AudioFeatures, EnrichedTrack};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which part of enrichment failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStage {
    Tracks,
    AudioFeatures,
    Artists,
    Store,
}

impl fmt::Display for EnrichmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnrichmentStage::Tracks => "tracks",
            EnrichmentStage::AudioFeatures => "audio features",
            EnrichmentStage::Artists => "artists",
            EnrichmentStage::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum FailureCause {
    Catalog(CatalogError),
    Storage(Error),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Catalog(e) => write!(f, "{}", e),
            FailureCause::Storage(e) => write!(f, "{}", e),
        }
    }
}

/// One failed sub-fetch or write, with the IDs it covered
#[derive(Debug)]
pub struct EnrichmentFailure {
    pub stage: EnrichmentStage,
    pub ids: Vec<String>,
    pub cause: FailureCause,
}

/// Outcome of one enrichment run
#[derive(Debug, Default)]
pub struct EnrichmentReport {
    /// Unique IDs requested
    pub requested: usize,
    /// IDs written to the track cache
    pub stored: Vec<String>,
    /// Stored without an audio-feature vector
    pub missing_features: Vec<String>,
    /// IDs the catalog returned no metadata for (and no fetch error covered)
    pub not_found: Vec<String>,
    pub failures: Vec<EnrichmentFailure>,
}

impl EnrichmentReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn was_stored(&self, catalog_id: &str) -> bool {
        self.stored.iter().any(|id| id == catalog_id)
    }

    /// Aggregate of every failure, or None when nothing failed
    pub fn aggregate_error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let summary = self
            .failures
            .iter()
            .map(|f| format!("{} ({} ids): {}", f.stage, f.ids.len(), f.cause))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::Enrichment(summary))
    }

    /// Move the first catalog error out of the report
    fn take_catalog_error(&mut self) -> Option<CatalogError> {
        let index = self
            .failures
            .iter()
            .position(|f| matches!(f.cause, FailureCause::Catalog(_)))?;
        match self.failures.swap_remove(index).cause {
            FailureCause::Catalog(e) => Some(e),
            FailureCause::Storage(_) => None,
        }
    }

    /// Error for a single-ID refresh that stored nothing
    fn into_refresh_error(mut self, catalog_id: &str) -> Error {
        if let Some(e) = self.take_catalog_error() {
            return Error::Upstream(e);
        }
        if let Some(failure) = self.failures.pop() {
            if let FailureCause::Storage(e) = failure.cause {
                return e;
            }
        }
        Error::NotFound(format!("track {} not in catalog", catalog_id))
    }
}

/// A track record plus whether it came from a failed refresh
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub track: EnrichedTrack,
    /// True when refresh failed and the previous record was returned
    pub served_stale: bool,
}

#[derive(Debug, Default)]
struct WorkingRecord {
    metadata: Option<CatalogTrack>,
    features: Option<CatalogAudioFeatures>,
    genres: Vec<String>,
}

type WorkingMap = Mutex<HashMap<String, WorkingRecord>>;

/// Chunk sizes for batched catalog lookups
#[derive(Debug, Clone, Copy)]
pub struct BatchSizes {
    pub tracks: usize,
    pub audio_features: usize,
    pub artists: usize,
}

impl From<&CatalogConfig> for BatchSizes {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            tracks: config.track_batch_size.max(1),
            audio_features: config.audio_feature_batch_size.max(1),
            artists: config.artist_batch_size.max(1),
        }
    }
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self::from(&CatalogConfig::default())
    }
}

/// Fetches, merges and caches catalog data
pub struct EnrichmentPipeline {
    catalog: Arc<dyn CatalogClient>,
    cache: Arc<dyn TrackCache>,
    batches: BatchSizes,
}

/// Remove duplicates, keeping first occurrence order
pub fn dedupe_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| !id.is_empty() && seen.insert(id.as_str()))
        .cloned()
        .collect()
}

impl EnrichmentPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        cache: Arc<dyn TrackCache>,
        batches: BatchSizes,
    ) -> Self {
        Self {
            catalog,
            cache,
            batches,
        }
    }

    pub fn cache(&self) -> &Arc<dyn TrackCache> {
        &self.cache
    }

    /// Enrich a batch of catalog IDs. Never fails as a whole; see the
    /// returned report for what was stored and what failed.
    pub async fn enrich(&self, ids: &[String], credential: &str) -> EnrichmentReport {
        let ids = dedupe_ids(ids);
        let mut report = EnrichmentReport {
            requested: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            return report;
        }

        let working: WorkingMap = Mutex::new(
            ids.iter()
                .map(|id| (id.clone(), WorkingRecord::default()))
                .collect(),
        );

        let metadata_branch = async {
            let mut failures = self.fetch_tracks(&ids, credential, &working).await;
            let artist_ids = collect_artist_ids(&working).await;
            failures.extend(self.fetch_genres(&artist_ids, credential, &working).await);
            failures
        };
        let features_branch = self.fetch_audio_features(&ids, credential, &working);

        let (metadata_failures, feature_failures) = tokio::join!(metadata_branch, features_branch);
        report.failures.extend(metadata_failures);
        report.failures.extend(feature_failures);

        let failed_track_ids: HashSet<String> = report
            .failures
            .iter()
            .filter(|f| f.stage == EnrichmentStage::Tracks)
            .flat_map(|f| f.ids.iter().cloned())
            .collect();

        let now = Utc::now();
        let mut working = working.into_inner();
        for id in &ids {
            let Some(record) = working.remove(id) else {
                continue;
            };
            let Some(track) = merge_record(record, now) else {
                if !failed_track_ids.contains(id) {
                    report.not_found.push(id.clone());
                }
                continue;
            };

            if track.audio_features.is_none() {
                report.missing_features.push(id.clone());
            }

            match self.cache.upsert(&track).await {
                Ok(()) => report.stored.push(id.clone()),
                Err(e) => {
                    warn!(catalog_id = %id, error = %e, "Failed to store enriched track");
                    report.failures.push(EnrichmentFailure {
                        stage: EnrichmentStage::Store,
                        ids: vec![id.clone()],
                        cause: FailureCause::Storage(e),
                    });
                }
            }
        }

        if report.is_complete() {
            debug!(
                requested = report.requested,
                stored = report.stored.len(),
                "Enrichment complete"
            );
        } else {
            info!(
                requested = report.requested,
                stored = report.stored.len(),
                failures = report.failures.len(),
                "Enrichment finished with failures"
            );
        }

        report
    }

    /// Cached record if fresh, otherwise refresh it.
    ///
    /// A failed refresh falls back to the stale record (flagged
    /// `served_stale`); with no record at all it fails.
    pub async fn get_or_refresh(
        &self,
        catalog_id: &str,
        credential: &str,
        staleness: Duration,
    ) -> Result<CacheLookup> {
        let cached = self.cache.get(catalog_id).await?;
        if let Some(track) = &cached {
            if !track.is_stale(staleness, Utc::now()) {
                return Ok(CacheLookup {
                    track: track.clone(),
                    served_stale: false,
                });
            }
        }

        let report = self.enrich(&[catalog_id.to_string()], credential).await;
        if report.was_stored(catalog_id) {
            // Re-read: the cache is authoritative after a write
            if let Some(track) = self.cache.get(catalog_id).await? {
                return Ok(CacheLookup {
                    track,
                    served_stale: false,
                });
            }
        }

        match cached {
            Some(track) => {
                warn!(
                    catalog_id = %catalog_id,
                    last_refreshed = %track.last_refreshed,
                    "Refresh failed, serving stale record"
                );
                Ok(CacheLookup {
                    track,
                    served_stale: true,
                })
            }
            None => Err(report.into_refresh_error(catalog_id)),
        }
    }

    async fn fetch_tracks(
        &self,
        ids: &[String],
        credential: &str,
        working: &WorkingMap,
    ) -> Vec<EnrichmentFailure> {
        let requests = ids.chunks(self.batches.tracks).map(|chunk| async move {
            match self.catalog.get_tracks(chunk, credential).await {
                Ok(tracks) => {
                    let mut map = working.lock().await;
                    for track in tracks {
                        if let Some(record) = map.get_mut(&track.id) {
                            record.metadata = Some(track);
                        }
                    }
                    None
                }
                Err(e) => Some(failure(EnrichmentStage::Tracks, chunk, e)),
            }
        });
        join_all(requests).await.into_iter().flatten().collect()
    }

    async fn fetch_audio_features(
        &self,
        ids: &[String],
        credential: &str,
        working: &WorkingMap,
    ) -> Vec<EnrichmentFailure> {
        let requests = ids.chunks(self.batches.audio_features).map(|chunk| async move {
            match self.catalog.get_audio_features(chunk, credential).await {
                Ok(features) => {
                    let mut map = working.lock().await;
                    for f in features {
                        if let Some(record) = map.get_mut(&f.id) {
                            record.features = Some(f);
                        }
                    }
                    None
                }
                Err(e) => Some(failure(EnrichmentStage::AudioFeatures, chunk, e)),
            }
        });
        join_all(requests).await.into_iter().flatten().collect()
    }

    async fn fetch_genres(
        &self,
        artist_ids: &[String],
        credential: &str,
        working: &WorkingMap,
    ) -> Vec<EnrichmentFailure> {
        let requests = artist_ids.chunks(self.batches.artists).map(|chunk| async move {
            match self.catalog.get_artists(chunk, credential).await {
                Ok(artists) => {
                    apply_genres(&artists, working).await;
                    None
                }
                Err(e) => Some(failure(EnrichmentStage::Artists, chunk, e)),
            }
        });
        join_all(requests).await.into_iter().flatten().collect()
    }
}

fn failure(stage: EnrichmentStage, ids: &[String], error: CatalogError) -> EnrichmentFailure {
    warn!(stage = %stage, ids = ids.len(), error = %error, "Catalog fetch failed");
    EnrichmentFailure {
        stage,
        ids: ids.to_vec(),
        cause: FailureCause::Catalog(error),
    }
}

/// Distinct artist IDs across every track that has metadata
async fn collect_artist_ids(working: &WorkingMap) -> Vec<String> {
    let map = working.lock().await;
    let mut ids: Vec<String> = map
        .values()
        .filter_map(|r| r.metadata.as_ref())
        .flat_map(|t| t.artists.iter().filter_map(|a| a.id.clone()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    ids.sort();
    ids
}

/// Add each artist's genres to the tracks that credit the artist
async fn apply_genres(artists: &[CatalogArtist], working: &WorkingMap) {
    let by_id: HashMap<&str, &CatalogArtist> =
        artists.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut map = working.lock().await;
    for record in map.values_mut() {
        let Some(track) = &record.metadata else {
            continue;
        };
        for credit in &track.artists {
            let Some(artist) = credit.id.as_deref().and_then(|id| by_id.get(id)) else {
                continue;
            };
            for genre in &artist.genres {
                if !record.genres.contains(genre) {
                    record.genres.push(genre.clone());
                }
            }
        }
    }
}

/// Build the cache record; None without metadata
fn merge_record(record: WorkingRecord, now: DateTime<Utc>) -> Option<EnrichedTrack> {
    let metadata = record.metadata?;

    // Genres arrive from concurrent chunks; keep the stored order stable
    let mut genres = record.genres;
    genres.sort();

    let audio_features = record.features.map(|f| AudioFeatures {
        danceability: f.danceability,
        energy: f.energy,
        valence: f.valence,
        tempo: f.tempo,
        instrumentalness: f.instrumentalness,
        acousticness: f.acousticness,
        liveness: f.liveness,
        speechiness: f.speechiness,
        loudness: f.loudness,
        key: f.key,
        mode: f.mode,
        time_signature: f.time_signature,
    });

    let (album, album_id) = match metadata.album {
        Some(album) => (Some(album.name), album.id),
        None => (None, None),
    };

    Some(EnrichedTrack {
        catalog_id: metadata.id,
        title: metadata.name,
        artists: metadata.artists.iter().map(|a| a.name.clone()).collect(),
        artist_ids: metadata.artists.iter().filter_map(|a| a.id.clone()).collect(),
        album,
        album_id,
        duration_ms: metadata.duration_ms,
        popularity: metadata.popularity,
        preview_url: metadata.preview_url,
        uri: metadata.uri,
        genres,
        audio_features,
        last_refreshed: now,
    })
}
