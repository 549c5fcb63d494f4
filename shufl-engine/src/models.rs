//! Core records: enriched tracks, per-user track signals, feedback actions

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Neutral per-track weight multiplier
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// Weight written by a "like"
pub const LIKE_WEIGHT: f64 = 1.5;

/// Weight written by a "dislike"
pub const DISLIKE_WEIGHT: f64 = 0.5;

/// Weight written by a "snooze"
pub const SNOOZE_WEIGHT: f64 = 1.0;

/// How long a snooze suppresses a track
pub const SNOOZE_HOURS: i64 = 24;

/// Audio-feature vector as reported by the catalog.
///
/// All fields except `tempo`, `loudness`, `key`, `mode` and
/// `time_signature` are in 0..=1. Tempo is BPM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub tempo: f64,
    pub instrumentalness: f64,
    pub acousticness: f64,
    pub liveness: f64,
    pub speechiness: f64,
    /// dB, typically -60..0
    pub loudness: f64,
    /// Pitch class, -1 when undetected
    pub key: i32,
    /// 1 major, 0 minor
    pub mode: i32,
    pub time_signature: i32,
}

/// A cached catalog track merged from metadata, audio features and
/// artist genres
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrack {
    pub catalog_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub artist_ids: Vec<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub duration_ms: i64,
    pub popularity: i64,
    pub preview_url: Option<String>,
    pub uri: String,
    /// Union of the genres of every credited artist
    pub genres: Vec<String>,
    /// None when the audio-feature fetch failed or the catalog has none
    pub audio_features: Option<AudioFeatures>,
    pub last_refreshed: DateTime<Utc>,
}

impl EnrichedTrack {
    pub fn has_preview(&self) -> bool {
        self.preview_url.is_some()
    }

    /// Stale records are refresh-eligible but may still be served as a fallback
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        shufl_common::time::is_older_than(self.last_refreshed, threshold, now)
    }

    /// "Title - Artist, Artist" for display
    pub fn display_name(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artists.join(", "))
        }
    }
}

/// Per-(user, track) signal written by feedback and playback tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTrackPreference {
    pub user_id: String,
    pub catalog_id: String,
    /// 1.0 is neutral, 0 disables the track
    pub weight: f64,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_played: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserTrackPreference {
    pub fn new(user_id: &str, catalog_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            catalog_id: catalog_id.to_string(),
            weight: NEUTRAL_WEIGHT,
            snoozed_until: None,
            last_played: None,
            tags: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }

    pub fn has_custom_weight(&self) -> bool {
        self.weight != NEUTRAL_WEIGHT
    }
}

/// User feedback on a single track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Like,
    Dislike,
    Snooze,
}

impl FeedbackAction {
    /// Weight stored for this action
    pub fn weight(&self) -> f64 {
        match self {
            FeedbackAction::Like => LIKE_WEIGHT,
            FeedbackAction::Dislike => DISLIKE_WEIGHT,
            FeedbackAction::Snooze => SNOOZE_WEIGHT,
        }
    }

    /// Snooze deadline set by this action; like/dislike leave any existing
    /// snooze untouched
    pub fn snooze_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            FeedbackAction::Snooze => Some(now + Duration::hours(SNOOZE_HOURS)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Like => "like",
            FeedbackAction::Dislike => "dislike",
            FeedbackAction::Snooze => "snooze",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(FeedbackAction::Like),
            "dislike" => Ok(FeedbackAction::Dislike),
            "snooze" => Ok(FeedbackAction::Snooze),
            other => Err(Error::Validation(format!(
                "unknown feedback action '{}' (expected like, dislike or snooze)",
                other
            ))),
        }
    }
}

/// Library counts for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibrarySummary {
    pub total: i64,
    /// Library tracks with a cached record
    pub enriched: i64,
    /// Cached records that carry an audio-feature vector
    pub with_features: i64,
}
