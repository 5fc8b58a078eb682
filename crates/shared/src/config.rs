//! Configuration management for the AniDB metadata provider.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// AniDB provider settings
    pub anidb: AniDbConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// AniDB provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AniDbConfig {
    /// Registered HTTP API client name
    pub client_name: String,

    /// Registered HTTP API client version
    pub client_version: u32,

    /// HTTP API endpoint used for series detail requests
    pub api_url: String,

    /// Location of the bulk title index dump
    pub titles_url: String,

    /// Prefix prepended to picture file names
    pub image_base_url: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Map tags onto the controlled genre vocabulary instead of using raw weighted tags
    #[serde(default = "default_tidy_genre_list")]
    pub tidy_genre_list: bool,

    /// Additional wait after every rate limiter release, in milliseconds
    #[serde(default)]
    pub extra_delay_ms: u64,

    /// Which title to display
    #[serde(default)]
    pub title_language: TitleLanguage,

    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

fn default_tidy_genre_list() -> bool {
    true
}

/// Title language preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleLanguage {
    /// Use the metadata languages supplied with each request
    #[default]
    UseLibrarySetting,
    /// Always prefer the main romanized title when present
    Romaji,
}

/// Rate limiting configuration
///
/// AniDB bans clients that request more than once every two seconds, or that
/// sustain a high average rate, so the defaults are deliberately slow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between two requests in milliseconds
    pub min_interval_ms: u64,

    /// Average spacing enforced over the window, in milliseconds
    pub average_interval_ms: u64,

    /// Window over which the average is measured, in seconds
    pub window_seconds: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (relative to data directory)
    pub cache_dir: String,

    /// Age in days after which a series document is refetched
    pub series_max_age_days: u64,

    /// Age in days after which the title index is refetched
    pub titles_max_age_days: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            anidb: AniDbConfig {
                client_name: "mediabrowser".to_string(),
                client_version: 1,
                api_url: "http://api.anidb.net:9001/httpapi".to_string(),
                titles_url: "http://anidb.net/api/anime-titles.xml.gz".to_string(),
                image_base_url: "http://img7.anidb.net/pics/anime/".to_string(),
                timeout_seconds: 30,
                tidy_genre_list: true,
                extra_delay_ms: 0,
                title_language: TitleLanguage::UseLibrarySetting,
                rate_limit: RateLimitConfig {
                    min_interval_ms: 3_000,
                    average_interval_ms: 5_000,
                    window_seconds: 300,
                },
                cache: CacheConfig {
                    cache_dir: "cache".to_string(),
                    series_max_age_days: 7,
                    titles_max_age_days: 7,
                },
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the absolute path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.log_dir)
    }

    /// Get the absolute path for the cache root
    pub fn cache_dir(&self) -> PathBuf {
        self.resolve(&self.anidb.cache.cache_dir)
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        let path = Path::new(dir);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}
