//! Configuration
//!
//! Two layers:
//! - [`Settings`]: user preferences stored in `~/.config/collpack/settings.json`
//! - [`ExportConfig`]: the resolved, validated configuration of one operation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default number of mods packaged in parallel
pub const DEFAULT_CONCURRENCY: usize = 4;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// User settings for collpack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path of the SQLite state database
    #[serde(default)]
    pub state_db_path: String,

    /// Default staging directory (where installed mods live)
    #[serde(default)]
    pub default_staging_dir: String,

    /// Default downloads directory (where the original archives live)
    #[serde(default)]
    pub default_downloads_dir: String,

    /// Base URL of the mod metadata service (empty = no lookups)
    #[serde(default)]
    pub meta_server_url: String,

    /// API key sent to the metadata and collection services
    #[serde(default)]
    pub meta_api_key: String,

    /// Mods packaged in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Name recorded as author/uploader of new collections
    #[serde(default)]
    pub uploader_name: String,

    /// Remote user id of the uploader, if logged in
    #[serde(default)]
    pub uploader_id: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_db_path: String::new(),
            default_staging_dir: String::new(),
            default_downloads_dir: String::new(),
            meta_server_url: String::new(),
            meta_api_key: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            uploader_name: String::new(),
            uploader_id: None,
        }
    }
}

impl Settings {
    /// Get the config directory path (~/.config/collpack)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("collpack");

        Ok(config_dir)
    }

    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|p| Self::try_load(&p)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Try to load settings from `path`, returning error on failure
    pub fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    /// Save settings to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// State database location, falling back to the config directory
    pub fn db_path(&self) -> Result<PathBuf> {
        if !self.state_db_path.is_empty() {
            return Ok(PathBuf::from(&self.state_db_path));
        }
        Ok(Self::config_dir()?.join("state.db"))
    }

    /// Uploader name, "Anonymous" when not configured
    pub fn uploader_or_anonymous(&self) -> String {
        if self.uploader_name.is_empty() {
            "Anonymous".to_string()
        } else {
            self.uploader_name.clone()
        }
    }
}

/// Format of the exported collection archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    SevenZip,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Configuration for one export/update/upload operation
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Local game id (e.g. `skyrimse`)
    pub game_id: String,

    /// Directory holding installed mods
    pub staging_dir: PathBuf,

    /// Directory holding the original archives
    pub downloads_dir: PathBuf,

    /// Where exported archives go (default: `<collection>/export`)
    pub export_dir: Option<PathBuf>,

    /// Maximum mods packaged in parallel
    pub concurrency: usize,

    /// Installed game version, recorded in the manifest
    pub game_version: Option<String>,

    /// Answer every prompt with its non-destructive default
    pub assume_yes: bool,

    pub archive_format: ArchiveFormat,
}

impl ExportConfig {
    pub fn new(game_id: impl Into<String>, staging_dir: PathBuf, downloads_dir: PathBuf) -> Self {
        Self {
            game_id: game_id.into(),
            staging_dir,
            downloads_dir,
            export_dir: None,
            concurrency: DEFAULT_CONCURRENCY,
            game_version: None,
            assume_yes: false,
            archive_format: ArchiveFormat::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game_id.is_empty() {
            return Err(ConfigError::MissingGame);
        }

        if !self.staging_dir.is_dir() {
            return Err(ConfigError::StagingDirNotFound(self.staging_dir.clone()));
        }

        if !self.downloads_dir.is_dir() {
            return Err(ConfigError::DownloadsDirNotFound(self.downloads_dir.clone()));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No game selected")]
    MissingGame,

    #[error("Staging directory not found: {0}")]
    StagingDirNotFound(PathBuf),

    #[error("Downloads directory not found: {0}")]
    DownloadsDirNotFound(PathBuf),

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.default_staging_dir.is_empty());
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.uploader_or_anonymous(), "Anonymous");
    }

    #[test]
    fn test_settings_serialize() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        let settings = Settings {
            default_staging_dir: "/home/user/mods".into(),
            meta_server_url: "https://meta.example.org".into(),
            uploader_name: "curator".into(),
            uploader_id: Some(42),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = Settings::try_load(&path).unwrap();
        assert_eq!(loaded.default_staging_dir, "/home/user/mods");
        assert_eq!(loaded.uploader_id, Some(42));
        assert_eq!(loaded.concurrency, 4);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let loaded: Settings = serde_json::from_str(r#"{"uploader_name":"x"}"#).unwrap();
        assert_eq!(loaded.concurrency, DEFAULT_CONCURRENCY);
        assert!(loaded.meta_server_url.is_empty());
    }

    #[test]
    fn test_export_config_validation() {
        let tmp = TempDir::new().unwrap();
        let mut config = ExportConfig::new("skyrimse", tmp.path().into(), tmp.path().into());
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConcurrency)));

        config.concurrency = 2;
        config.staging_dir = tmp.path().join("missing");
        assert!(matches!(config.validate(), Err(ConfigError::StagingDirNotFound(_))));
    }
}
