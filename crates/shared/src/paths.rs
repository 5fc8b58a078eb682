//! File path utilities for the on-disk AniDB cache.
//!
//! Every artifact lives under a single cache root:
//!
//! ```text
//! <root>/anidb/series/<aid>/series.xml
//! <root>/anidb/series/<aid>/episode-<epno>.xml
//! <root>/anidb/titles/anime-titles.xml
//! <root>/anidb-people/<first letter>/<name>.xml
//! ```

use std::path::{Path, PathBuf};

const SERIES_FILE: &str = "series.xml";
const EPISODE_PREFIX: &str = "episode-";

/// File path manager for cached AniDB documents
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// Create a new CachePaths with the given root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Series ==========

    /// Directory holding all cached series
    pub fn series_root(&self) -> PathBuf {
        self.root.join("anidb").join("series")
    }

    /// Directory holding one series document and its episode documents
    pub fn series_dir(&self, anidb_id: u32) -> PathBuf {
        self.series_root().join(anidb_id.to_string())
    }

    /// Full series detail document
    pub fn series_file(&self, anidb_id: u32) -> PathBuf {
        self.series_dir(anidb_id).join(SERIES_FILE)
    }

    /// Single episode document, keyed by the raw `epno` text ("1", "S2", ...)
    pub fn episode_file(&self, anidb_id: u32, epno: &str) -> PathBuf {
        self.series_dir(anidb_id)
            .join(format!("{}{}.xml", EPISODE_PREFIX, sanitize(epno)))
    }

    /// Whether a file name inside a series directory is an episode document
    pub fn is_episode_file(file_name: &str) -> bool {
        file_name.starts_with(EPISODE_PREFIX) && file_name.ends_with(".xml")
    }

    // ========== Titles ==========

    /// Bulk title index dump
    pub fn titles_file(&self) -> PathBuf {
        self.root.join("anidb").join("titles").join("anime-titles.xml")
    }

    // ========== People ==========

    /// Shared people cache, independent of any series
    pub fn people_dir(&self) -> PathBuf {
        self.root.join("anidb-people")
    }

    /// Person document keyed by lower-cased name, bucketed by first letter
    pub fn person_file(&self, name: &str) -> Option<PathBuf> {
        let key = sanitize(&name.trim().to_lowercase());
        let first = key.chars().next()?;

        Some(
            self.people_dir()
                .join(first.to_string())
                .join(format!("{}.xml", key)),
        )
    }

    // ========== Utility Methods ==========

    /// Create the fixed top-level directories
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.series_root(),
            self.root.join("anidb").join("titles"),
            self.people_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        Ok(())
    }
}

/// Replace characters that cannot appear in a single path component
fn sanitize(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_paths() {
        let paths = CachePaths::new("/cache");

        assert_eq!(
            paths.series_file(5114),
            PathBuf::from("/cache/anidb/series/5114/series.xml")
        );

        assert_eq!(
            paths.episode_file(5114, "S1"),
            PathBuf::from("/cache/anidb/series/5114/episode-S1.xml")
        );

        assert_eq!(
            paths.titles_file(),
            PathBuf::from("/cache/anidb/titles/anime-titles.xml")
        );
    }

    #[test]
    fn test_person_paths() {
        let paths = CachePaths::new("/cache");

        assert_eq!(
            paths.person_file("Hayashibara Megumi"),
            Some(PathBuf::from("/cache/anidb-people/h/hayashibara megumi.xml"))
        );

        assert_eq!(
            paths.person_file("AC/DC"),
            Some(PathBuf::from("/cache/anidb-people/a/ac_dc.xml"))
        );

        assert_eq!(paths.person_file("   "), None);
    }

    #[test]
    fn test_is_episode_file() {
        assert!(CachePaths::is_episode_file("episode-12.xml"));
        assert!(!CachePaths::is_episode_file("series.xml"));
        assert!(!CachePaths::is_episode_file("episode-12.xml.tmp"));
    }
}
