//! Preference-weighted track scoring
//!
//! Scoring is pure: it reads a track, the session's shuffle preferences and
//! the user's stored signal for that track, and never touches I/O.
//!
//! The base score is the importance-weighted mean of per-dimension
//! similarities `1 - |actual - target|`. It is then scaled by the memory
//! bias (recent plays drop to half, recovering over 24 hours) and forced to
//! zero while the track is snoozed.

use crate::models::{EnrichedTrack, UserTrackPreference};
use crate::preferences::ShufflePreferences;
use chrono::{DateTime, Utc};

/// Hours over which a recent play stops suppressing the score
pub const MEMORY_BIAS_WINDOW_HOURS: f64 = 24.0;

/// Default divisor that maps BPM into the 0..1 target space
pub const DEFAULT_TEMPO_CEILING: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scorer {
    tempo_ceiling: f64,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPO_CEILING)
    }
}

impl Scorer {
    pub fn new(tempo_ceiling: f64) -> Self {
        Self { tempo_ceiling }
    }

    /// Similarity score before memory bias and snooze, in [0, 1].
    ///
    /// Returns 0 when no dimension carries weight or the track has no
    /// audio-feature vector.
    pub fn base_score(&self, track: &EnrichedTrack, prefs: &ShufflePreferences) -> f64 {
        let Some(features) = &track.audio_features else {
            return 0.0;
        };

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (feature, target) in prefs.features() {
            let actual = feature.normalized_value(features, self.tempo_ceiling);
            let similarity = (1.0 - (actual - target.target).abs()).clamp(0.0, 1.0);
            let weight = feature.importance() * target.weight;

            weighted_sum += similarity * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        }
    }

    /// Score with memory bias and snooze applied. The per-track weight
    /// multiplier is not applied here; see [`apply_user_weight`].
    pub fn score(
        &self,
        track: &EnrichedTrack,
        prefs: &ShufflePreferences,
        user_pref: Option<&UserTrackPreference>,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut score = self.base_score(track, prefs);

        if let Some(pref) = user_pref {
            if let Some(last_played) = pref.last_played {
                score *= memory_bias(last_played, now);
            }
            if pref.is_snoozed(now) {
                return 0.0;
            }
        }

        score
    }

    /// [`Scorer::score`] followed by the user's weight multiplier
    pub fn rank_score(
        &self,
        track: &EnrichedTrack,
        prefs: &ShufflePreferences,
        user_pref: Option<&UserTrackPreference>,
        now: DateTime<Utc>,
    ) -> f64 {
        apply_user_weight(self.score(track, prefs, user_pref, now), user_pref)
    }
}

/// Scale factor for a track last played at `last_played`: 0.5 right after
/// a play, rising linearly to 1.0 after the memory window
pub fn memory_bias(last_played: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = shufl_common::time::hours_since(last_played, now);
    let recovered = (hours / MEMORY_BIAS_WINDOW_HOURS).clamp(0.0, 1.0);
    0.5 + 0.5 * recovered
}

/// Multiply by the user's per-track weight when it differs from neutral
pub fn apply_user_weight(score: f64, user_pref: Option<&UserTrackPreference>) -> f64 {
    match user_pref {
        Some(pref) if pref.has_custom_weight() => score * pref.weight,
        _ => score,
    }
}
