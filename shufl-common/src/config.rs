//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "SHUFL_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "shufl.db";

/// Logging section shared by every binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument
/// 2. `SHUFL_ROOT` environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent default
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            config_file: None,
        }
    }

    /// Highest-priority override from the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Use an explicit config file instead of the platform location
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        let config_path = self
            .config_file
            .clone()
            .or_else(|| default_config_file(&self.module_name));
        if let Some(config_path) = config_path {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                if let Ok(value) = toml::from_str::<toml::Value>(&content) {
                    if let Some(root) = value.get("root_folder").and_then(|v| v.as_str()) {
                        return PathBuf::from(root);
                    }
                }
            }
        }

        default_root_folder()
    }
}

/// Creates the root folder on first run and derives file locations in it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

/// Platform location of `<module>.toml`, if the platform has a config dir
pub fn default_config_file(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("shufl").join(format!("{}.toml", module_name)))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("shufl"))
        .unwrap_or_else(|| PathBuf::from("./shufl_data"))
}

/// Load a TOML config file into `T`.
///
/// A missing file is not an error: a warning is logged and `T::default()`
/// is returned. A present but malformed file is a `Config` error.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write a config value as TOML, creating parent directories as needed
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
