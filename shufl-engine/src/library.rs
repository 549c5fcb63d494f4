//! Library import and stale-record refresh

use crate::config::CacheConfig;
use crate::db::{TrackCache, UserLibraryStore};
use crate::enrichment::{dedupe_ids, EnrichmentPipeline, EnrichmentReport};
use crate::error::Result;
use crate::models::LibrarySummary;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of importing a list of catalog IDs into a user's library
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub requested: usize,
    pub unique: usize,
    /// IDs that were not in the library before
    pub newly_added: u64,
    pub enriched: usize,
    pub missing_features: usize,
    pub not_found: usize,
    pub failed_batches: usize,
    /// One line per failed batch
    pub errors: Vec<String>,
}

pub struct LibraryService {
    library: Arc<dyn UserLibraryStore>,
    tracks: Arc<dyn TrackCache>,
    enrichment: Arc<EnrichmentPipeline>,
    cache: CacheConfig,
    batch_size: usize,
}

impl LibraryService {
    pub fn new(
        library: Arc<dyn UserLibraryStore>,
        tracks: Arc<dyn TrackCache>,
        enrichment: Arc<EnrichmentPipeline>,
        cache: CacheConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            library,
            tracks,
            enrichment,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    /// Add IDs to the user's library and enrich them batch by batch.
    ///
    /// A failed batch is logged and counted; later batches still run.
    pub async fn import_library(
        &self,
        user_id: &str,
        catalog_ids: &[String],
        credential: &str,
    ) -> Result<ImportSummary> {
        let unique = dedupe_ids(catalog_ids);
        let newly_added = self.library.add_tracks(user_id, &unique).await?;

        let mut summary = ImportSummary {
            requested: catalog_ids.len(),
            unique: unique.len(),
            newly_added,
            ..Default::default()
        };

        let batch_count = unique.len().div_ceil(self.batch_size);
        for (index, batch) in unique.chunks(self.batch_size).enumerate() {
            let report = self.enrichment.enrich(batch, credential).await;

            summary.enriched += report.stored.len();
            summary.missing_features += report.missing_features.len();
            summary.not_found += report.not_found.len();

            if let Some(e) = report.aggregate_error() {
                warn!(
                    user_id = %user_id,
                    batch = index + 1,
                    batches = batch_count,
                    error = %e,
                    "Import batch incomplete"
                );
                summary.failed_batches += 1;
                summary.errors.push(format!("batch {}: {}", index + 1, e));
            }
        }

        info!(
            user_id = %user_id,
            unique = summary.unique,
            newly_added = summary.newly_added,
            enriched = summary.enriched,
            failed_batches = summary.failed_batches,
            "Library import finished"
        );

        Ok(summary)
    }

    /// Re-enrich up to `refresh_limit` uncached or stale library tracks
    pub async fn refresh_stale(&self, user_id: &str, credential: &str) -> Result<EnrichmentReport> {
        let stale = self
            .tracks
            .stale_ids(
                user_id,
                self.cache.staleness(),
                Utc::now(),
                self.cache.refresh_limit,
            )
            .await?;

        if stale.is_empty() {
            return Ok(EnrichmentReport::default());
        }

        info!(user_id = %user_id, count = stale.len(), "Refreshing stale library tracks");
        Ok(self.enrichment.enrich(&stale, credential).await)
    }

    pub async fn summary(&self, user_id: &str) -> Result<LibrarySummary> {
        self.library.summary(user_id).await
    }
}
