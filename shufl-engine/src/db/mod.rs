//! Storage seams and their SQLite implementations

pub mod library;
pub mod prefs;
pub mod tracks;

use crate::error::Result;
use crate::models::{EnrichedTrack, FeedbackAction, LibrarySummary, UserTrackPreference};
use crate::preferences::TrackFilters;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

pub use library::SqliteUserLibrary;
pub use prefs::SqlitePreferenceStore;
pub use tracks::SqliteTrackCache;

/// SQLite caps bound parameters per statement; batched reads chunk to this
pub(crate) const MAX_BIND_PARAMS: usize = 500;

/// Durable store of enriched track records
#[async_trait]
pub trait TrackCache: Send + Sync {
    async fn get(&self, catalog_id: &str) -> Result<Option<EnrichedTrack>>;

    /// Records for every known ID; unknown IDs are absent
    async fn get_many(&self, catalog_ids: &[String]) -> Result<Vec<EnrichedTrack>>;

    /// Insert or overwrite by catalog ID
    async fn upsert(&self, track: &EnrichedTrack) -> Result<()>;

    /// Playable library tracks for `user_id` matching `filters`, ordered by
    /// catalog ID. Playable means the record has an audio-feature vector
    /// (and a preview when the filter asks for one).
    async fn playable(&self, user_id: &str, filters: &TrackFilters) -> Result<Vec<EnrichedTrack>>;

    /// Library track IDs that are uncached or older than `threshold`,
    /// uncached first, then oldest refresh first
    async fn stale_ids(
        &self,
        user_id: &str,
        threshold: Duration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;
}

/// Durable store of per-(user, track) signals
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: &str, catalog_id: &str) -> Result<Option<UserTrackPreference>>;

    /// Rows for exactly the given tracks, keyed by catalog ID
    async fn get_for_tracks(
        &self,
        user_id: &str,
        catalog_ids: &[String],
    ) -> Result<HashMap<String, UserTrackPreference>>;

    /// Apply a feedback action and return the stored row
    async fn upsert_feedback(
        &self,
        user_id: &str,
        catalog_id: &str,
        action: FeedbackAction,
        now: DateTime<Utc>,
    ) -> Result<UserTrackPreference>;

    async fn mark_played(&self, user_id: &str, catalog_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Which catalog tracks belong to which user
#[async_trait]
pub trait UserLibraryStore: Send + Sync {
    /// Returns how many IDs were newly added
    async fn add_tracks(&self, user_id: &str, catalog_ids: &[String]) -> Result<u64>;

    /// Library track IDs in insertion order
    async fn track_ids(&self, user_id: &str) -> Result<Vec<String>>;

    async fn summary(&self, user_id: &str) -> Result<LibrarySummary>;
}
