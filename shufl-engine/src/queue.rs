//! Ranked queue generation

use crate::config::{CacheConfig, ScoringConfig};
use crate::db::{PreferenceStore, TrackCache};
use crate::error::{Error, Result};
use crate::preferences::ShufflePreferences;
use crate::scoring::Scorer;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// A catalog ID with its rank score
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTrack {
    pub catalog_id: String,
    pub score: f64,
}

/// Builds a user's ranked track sequence from cached candidates
pub struct QueueGenerator {
    tracks: Arc<dyn TrackCache>,
    preferences: Arc<dyn PreferenceStore>,
    scorer: Scorer,
    base_tolerance: f64,
    tempo_ceiling: f64,
    require_preview: bool,
}

impl QueueGenerator {
    pub fn new(
        tracks: Arc<dyn TrackCache>,
        preferences: Arc<dyn PreferenceStore>,
        scoring: &ScoringConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            tracks,
            preferences,
            scorer: Scorer::new(scoring.tempo_ceiling),
            base_tolerance: scoring.base_tolerance,
            tempo_ceiling: scoring.tempo_ceiling,
            require_preview: cache.require_preview,
        }
    }

    pub fn scorer(&self) -> Scorer {
        self.scorer
    }

    /// Ordered catalog IDs, best first
    pub async fn generate(&self, user_id: &str, prefs: &ShufflePreferences) -> Result<Vec<String>> {
        Ok(self
            .rank(user_id, prefs)
            .await?
            .into_iter()
            .map(|r| r.catalog_id)
            .collect())
    }

    /// Score every playable candidate and sort descending.
    ///
    /// The sort is stable, so equal scores keep the cache's read order.
    /// Snoozed tracks stay in the result with score 0.
    pub async fn rank(&self, user_id: &str, prefs: &ShufflePreferences) -> Result<Vec<RankedTrack>> {
        let filters = prefs.to_filters(self.base_tolerance, self.tempo_ceiling, self.require_preview)?;

        let candidates = self.tracks.playable(user_id, &filters).await?;
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }

        let ids: Vec<String> = candidates.iter().map(|t| t.catalog_id.clone()).collect();
        let signals = self.preferences.get_for_tracks(user_id, &ids).await?;

        let now = Utc::now();
        let mut ranked: Vec<RankedTrack> = candidates
            .iter()
            .map(|track| RankedTrack {
                catalog_id: track.catalog_id.clone(),
                score: self
                    .scorer
                    .rank_score(track, prefs, signals.get(&track.catalog_id), now),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(
            user_id = %user_id,
            candidates = ranked.len(),
            with_signal = signals.len(),
            "Generated ranked queue"
        );

        Ok(ranked)
    }
}
