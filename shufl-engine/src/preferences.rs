//! Shuffle preferences and the candidate filters derived from them

use crate::error::{Error, Result};
use crate::models::{AudioFeatures, EnrichedTrack};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Audio-feature dimensions that can be targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFeature {
    Danceability,
    Energy,
    Valence,
    Tempo,
    Instrumentalness,
    Acousticness,
    Liveness,
    Speechiness,
}

impl AudioFeature {
    pub const ALL: [AudioFeature; 8] = [
        AudioFeature::Danceability,
        AudioFeature::Energy,
        AudioFeature::Valence,
        AudioFeature::Tempo,
        AudioFeature::Instrumentalness,
        AudioFeature::Acousticness,
        AudioFeature::Liveness,
        AudioFeature::Speechiness,
    ];

    /// Name used in preferences and as the cache column name
    pub fn name(&self) -> &'static str {
        match self {
            AudioFeature::Danceability => "danceability",
            AudioFeature::Energy => "energy",
            AudioFeature::Valence => "valence",
            AudioFeature::Tempo => "tempo",
            AudioFeature::Instrumentalness => "instrumentalness",
            AudioFeature::Acousticness => "acousticness",
            AudioFeature::Liveness => "liveness",
            AudioFeature::Speechiness => "speechiness",
        }
    }

    /// Fixed importance of the dimension in the similarity model
    pub fn importance(&self) -> f64 {
        match self {
            AudioFeature::Danceability | AudioFeature::Energy | AudioFeature::Valence => 1.0,
            AudioFeature::Tempo => 0.7,
            AudioFeature::Instrumentalness | AudioFeature::Acousticness => 0.5,
            AudioFeature::Liveness | AudioFeature::Speechiness => 0.3,
        }
    }

    /// Raw value as stored (tempo in BPM)
    pub fn raw_value(&self, features: &AudioFeatures) -> f64 {
        match self {
            AudioFeature::Danceability => features.danceability,
            AudioFeature::Energy => features.energy,
            AudioFeature::Valence => features.valence,
            AudioFeature::Tempo => features.tempo,
            AudioFeature::Instrumentalness => features.instrumentalness,
            AudioFeature::Acousticness => features.acousticness,
            AudioFeature::Liveness => features.liveness,
            AudioFeature::Speechiness => features.speechiness,
        }
    }

    /// Value in the 0..1 target space; tempo is divided by `tempo_ceiling`
    pub fn normalized_value(&self, features: &AudioFeatures, tempo_ceiling: f64) -> f64 {
        let raw = self.raw_value(features);
        match self {
            AudioFeature::Tempo => raw / tempo_ceiling,
            _ => raw,
        }
    }

    /// Convert a 0..1 target-space value back to stored units
    fn denormalize(&self, value: f64, tempo_ceiling: f64) -> f64 {
        match self {
            AudioFeature::Tempo => value * tempo_ceiling,
            _ => value,
        }
    }
}

impl fmt::Display for AudioFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFeature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AudioFeature::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| Error::Validation(format!("unknown audio feature '{}'", s)))
    }
}

fn default_feature_weight() -> f64 {
    1.0
}

/// Desired value and user-tunable weight for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureTarget {
    /// In 0..1; tempo targets are expressed as BPM / tempo ceiling
    pub target: f64,
    #[serde(default = "default_feature_weight")]
    pub weight: f64,
}

impl FeatureTarget {
    pub fn new(target: f64, weight: f64) -> Self {
        Self { target, weight }
    }
}

/// Request-scoped shuffle preferences, immutable once a session starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShufflePreferences {
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    /// Keyed by feature name
    pub audio_features: BTreeMap<String, FeatureTarget>,
}

impl ShufflePreferences {
    pub fn with_feature(mut self, feature: AudioFeature, target: f64, weight: f64) -> Self {
        self.audio_features
            .insert(feature.name().to_string(), FeatureTarget::new(target, weight));
        self
    }

    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres.extend(genres.into_iter().map(Into::into));
        self
    }

    /// Reject unknown feature names, bad weights and out-of-range targets
    pub fn validate(&self) -> Result<()> {
        for (name, target) in &self.audio_features {
            let feature: AudioFeature = name.parse()?;
            if !target.weight.is_finite() || target.weight <= 0.0 {
                return Err(Error::Validation(format!(
                    "weight for {} must be a positive number, got {}",
                    feature, target.weight
                )));
            }
            if !target.target.is_finite() || !(0.0..=1.0).contains(&target.target) {
                return Err(Error::Validation(format!(
                    "target for {} must be within [0, 1], got {}",
                    feature, target.target
                )));
            }
        }
        Ok(())
    }

    /// Recognized feature targets in name order; unknown names are skipped
    pub fn features(&self) -> impl Iterator<Item = (AudioFeature, &FeatureTarget)> + '_ {
        self.audio_features
            .iter()
            .filter_map(|(name, target)| name.parse().ok().map(|f| (f, target)))
    }

    /// Genres and tags, lowercased and deduplicated
    pub fn genre_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in self.genres.iter().chain(self.tags.iter()) {
            let term = term.trim().to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    /// Candidate filters for the track cache.
    ///
    /// Each targeted dimension becomes `target ± base_tolerance / weight`.
    /// A bound that reaches the edge of 0..1 is left open.
    pub fn to_filters(
        &self,
        base_tolerance: f64,
        tempo_ceiling: f64,
        require_preview: bool,
    ) -> Result<TrackFilters> {
        self.validate()?;

        let ranges = self
            .features()
            .map(|(feature, target)| {
                let tolerance = base_tolerance / target.weight;
                let low = target.target - tolerance;
                let high = target.target + tolerance;
                FeatureRange {
                    feature,
                    min: (low > 0.0).then(|| feature.denormalize(low, tempo_ceiling)),
                    max: (high < 1.0).then(|| feature.denormalize(high, tempo_ceiling)),
                }
            })
            .collect();

        Ok(TrackFilters {
            genres: self.genre_terms(),
            ranges,
            require_preview,
        })
    }
}

/// Inclusive bounds on one stored feature column; None is unbounded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRange {
    pub feature: AudioFeature,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FeatureRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Candidate filters derived from shuffle preferences
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFilters {
    /// Lowercase genre terms; empty means no genre filter
    pub genres: Vec<String>,
    pub ranges: Vec<FeatureRange>,
    pub require_preview: bool,
}

impl TrackFilters {
    pub fn matches_genres(&self, track: &EnrichedTrack) -> bool {
        self.genres.is_empty()
            || track
                .genres
                .iter()
                .any(|g| self.genres.contains(&g.to_lowercase()))
    }

    /// Full in-memory check, equivalent to the SQL filter plus genres
    pub fn matches(&self, track: &EnrichedTrack) -> bool {
        let Some(features) = &track.audio_features else {
            return false;
        };
        if self.require_preview && !track.has_preview() {
            return false;
        }
        self.ranges
            .iter()
            .all(|r| r.contains(r.feature.raw_value(features)))
            && self.matches_genres(track)
    }
}
