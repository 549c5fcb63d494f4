//! Engine configuration (`shufl.toml`)
//!
//! Every key is optional; a missing file or section yields the defaults
//! below.

use crate::catalog::spotify::SPOTIFY_BASE_URL;
use crate::error::{Error, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use shufl_common::config::{load_toml_config, LoggingConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding a catalog bearer token
pub const ACCESS_TOKEN_ENV: &str = "SHUFL_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root_folder: Option<PathBuf>,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    pub scoring: ScoringConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    /// Per-user bearer tokens, keyed by user ID
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub track_batch_size: usize,
    pub audio_feature_batch_size: usize,
    pub artist_batch_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: SPOTIFY_BASE_URL.to_string(),
            request_timeout_secs: 15,
            track_batch_size: 50,
            audio_feature_batch_size: 100,
            artist_batch_size: 50,
        }
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub staleness_hours: u64,
    /// Re-enrich stale library tracks before generating a session queue
    pub refresh_on_session_start: bool,
    /// Upper bound on tracks re-enriched per refresh
    pub refresh_limit: usize,
    /// Only tracks with a preview clip are playable
    pub require_preview: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_hours: 24,
            refresh_on_session_start: true,
            refresh_limit: 200,
            require_preview: false,
        }
    }
}

impl CacheConfig {
    pub fn staleness(&self) -> ChronoDuration {
        shufl_common::time::hours(self.staleness_hours)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Range half-width at weight 1.0
    pub base_tolerance: f64,
    pub tempo_ceiling: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_tolerance: 0.3,
            tempo_ceiling: crate::scoring::DEFAULT_TEMPO_CEILING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub monitor_interval_secs: u64,
    /// Top up when the external queue is shallower than this
    pub low_water_mark: usize,
    /// Tracks pushed per seeding or top-up
    pub top_up_batch: usize,
    /// Top up when the playing item has less than this fraction left
    pub near_end_fraction: f64,
    /// Entries returned by a current-queue lookup
    pub preview_length: usize,
    pub clear_skip_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 10,
            low_water_mark: 3,
            top_up_batch: 5,
            near_end_fraction: 0.2,
            preview_length: 10,
            clear_skip_delay_ms: 100,
        }
    }
}

impl SessionConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn clear_skip_delay(&self) -> Duration {
        Duration::from_millis(self.clear_skip_delay_ms)
    }
}

impl EngineConfig {
    /// Load from `path`; a missing file gives defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: EngineConfig = load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let catalog = &self.catalog;
        if catalog.track_batch_size == 0
            || catalog.audio_feature_batch_size == 0
            || catalog.artist_batch_size == 0
        {
            return Err(Error::Validation("catalog batch sizes must be at least 1".into()));
        }
        if self.scoring.base_tolerance <= 0.0 || !self.scoring.base_tolerance.is_finite() {
            return Err(Error::Validation("scoring.base_tolerance must be positive".into()));
        }
        if self.scoring.tempo_ceiling <= 0.0 || !self.scoring.tempo_ceiling.is_finite() {
            return Err(Error::Validation("scoring.tempo_ceiling must be positive".into()));
        }
        if self.session.monitor_interval_secs == 0 {
            return Err(Error::Validation(
                "session.monitor_interval_secs must be at least 1".into(),
            ));
        }
        if self.session.top_up_batch == 0 {
            return Err(Error::Validation("session.top_up_batch must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.session.near_end_fraction) {
            return Err(Error::Validation(
                "session.near_end_fraction must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Resolve a user's bearer token.
///
/// **Priority:** command line → `SHUFL_ACCESS_TOKEN` → `[credentials]` in TOML
pub fn resolve_access_token(
    cli_token: Option<&str>,
    config: &EngineConfig,
    user_id: &str,
) -> Result<String> {
    if let Some(token) = cli_token.filter(|t| !t.trim().is_empty()) {
        info!(user_id = %user_id, "Access token taken from command line");
        return Ok(token.to_string());
    }

    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.trim().is_empty() {
            info!(user_id = %user_id, "Access token taken from {}", ACCESS_TOKEN_ENV);
            return Ok(token);
        }
        warn!("{} is set but empty, ignoring", ACCESS_TOKEN_ENV);
    }

    if let Some(token) = config.credentials.get(user_id) {
        info!(user_id = %user_id, "Access token taken from TOML config");
        return Ok(token.clone());
    }

    Err(Error::Credential(user_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.catalog.base_url, "https://api.spotify.com/v1");
        assert_eq!(config.catalog.track_batch_size, 50);
        assert_eq!(config.cache.staleness_hours, 24);
        assert_eq!(config.scoring.base_tolerance, 0.3);
        assert_eq!(config.scoring.tempo_ceiling, 200.0);
        assert_eq!(config.session.monitor_interval(), Duration::from_secs(10));
        assert_eq!(config.session.low_water_mark, 3);
        assert_eq!(config.session.top_up_batch, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [session]
            low_water_mark = 4

            [credentials]
            alice = "token-a"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.low_water_mark, 4);
        assert_eq!(config.session.top_up_batch, 5);
        assert_eq!(config.cache.refresh_limit, 200);
        assert_eq!(config.credentials["alice"], "token-a");
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = EngineConfig::default();
        config.catalog.artist_batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();

        let missing = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing, EngineConfig::default());

        let path = dir.path().join("shufl.toml");
        std::fs::write(&path, "[session]\ntop_up_batch = 0\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Validation(_))));

        std::fs::write(&path, "[scoring]\nbase_tolerance = 0.25\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().scoring.base_tolerance, 0.25);
    }

    #[test]
    fn test_cli_token_wins() {
        let mut config = EngineConfig::default();
        config.credentials.insert("alice".into(), "from-toml".into());
        assert_eq!(
            resolve_access_token(Some("from-cli"), &config, "alice").unwrap(),
            "from-cli"
        );
    }
}
