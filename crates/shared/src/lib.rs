//! Shared library for the AniDB metadata provider.
//!
//! This crate provides common functionality used by the provider crate:
//! - Configuration management
//! - Data models handed to the media catalog
//! - Cache path layout
//! - Logging infrastructure

pub mod config;
pub mod logging;
pub mod models;
pub mod paths;

// Re-export commonly used types
pub use config::{Config, TitleLanguage};
pub use logging::LogConfig;
pub use models::*;
pub use paths::CachePaths;

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
