//! On-disk document cache.
//!
//! Keeps local copies of series documents and the title index, refetching
//! them when missing or older than their freshness window. Fresh reads take
//! no lock; a refresh holds a per-document lock so concurrent requests for
//! the same document cause a single fetch.

use crate::api::AniDbClient;
use crate::error::{AniDbError, Result};
use crate::parser::episode::split_episodes;
use crate::people::{extract_people, PersonCache};
use dashmap::DashMap;
use shared::config::AniDbConfig;
use shared::CachePaths;
use std::future::Future;
use std::collections::HashSet;
use std::ffi::OsString;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Documents guarded by the keyed lock map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Series(u32),
    Titles,
}

/// Async locks created on demand per key and dropped once unreferenced
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for the lock on `key`
    pub async fn lock(&self, key: K, cancel: &CancellationToken) -> Result<KeyedGuard<'_, K>> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = mutex.clone().lock_owned() => Some(guard),
        };
        drop(mutex);

        match acquired {
            Some(guard) => Ok(KeyedGuard {
                locks: self,
                key,
                guard: Some(guard),
            }),
            None => {
                self.release(&key);
                Err(AniDbError::Cancelled)
            }
        }
    }

    /// Forget the entry unless another caller still holds or waits on it
    fn release(&self, key: &K) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock; releasing it cleans up the map entry
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc; drop it before checking the count
        self.guard.take();
        self.locks.release(&self.key);
    }
}

/// Whether `path` exists and was written within `max_age` of `now`
pub async fn is_fresh_at(path: &Path, max_age: Duration, now: SystemTime) -> bool {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };

    match now.duration_since(modified) {
        Ok(age) => age <= max_age,
        // Written "in the future": clock skew, treat as fresh
        Err(_) => true,
    }
}

pub async fn is_fresh(path: &Path, max_age: Duration) -> bool {
    is_fresh_at(path, max_age, SystemTime::now()).await
}

/// Suffix for temp files, unique per process and per write
fn temp_suffix() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!(".{}.{}.tmp", std::process::id(), n)
}

/// Write through a temp file in the same directory, then rename into place
///
/// Every call gets its own temp file, so concurrent writers of one path each
/// rename a complete document and the last rename wins. On failure the temp
/// file is removed and any previous file is untouched.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(temp_suffix());
    let tmp = PathBuf::from(tmp);

    let written = match tokio::fs::write(&tmp, contents).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

/// Local copies of AniDB documents
pub struct CacheStore {
    paths: CachePaths,
    client: Arc<AniDbClient>,
    people: PersonCache,
    image_base_url: String,
    locks: KeyedLocks<DocumentKey>,
    series_max_age: Duration,
    titles_max_age: Duration,
}

impl CacheStore {
    pub fn new(paths: CachePaths, client: Arc<AniDbClient>, config: &AniDbConfig) -> Self {
        Self {
            people: PersonCache::new(paths.clone()),
            paths,
            client,
            image_base_url: config.image_base_url.clone(),
            locks: KeyedLocks::new(),
            series_max_age: Duration::from_secs(config.cache.series_max_age_days * SECONDS_PER_DAY),
            titles_max_age: Duration::from_secs(config.cache.titles_max_age_days * SECONDS_PER_DAY),
        }
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn people(&self) -> &PersonCache {
        &self.people
    }

    pub fn client(&self) -> &AniDbClient {
        &self.client
    }

    /// Live entries in the keyed lock map
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    /// Ensure `path` is fresh, running `refresh` at most once across callers
    async fn ensure<F, Fut>(
        &self,
        key: DocumentKey,
        path: &Path,
        max_age: Duration,
        cancel: &CancellationToken,
        refresh: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if is_fresh(path, max_age).await {
            debug!(key = ?key, "Cache hit");
            return Ok(());
        }

        let _guard = self.locks.lock(key, cancel).await?;

        // Another caller may have refreshed it while we waited
        if is_fresh(path, max_age).await {
            debug!(key = ?key, "Refreshed by a concurrent request");
            return Ok(());
        }

        refresh().await
    }

    /// Path of a fresh series document
    pub async fn series_document(&self, anidb_id: u32, cancel: &CancellationToken) -> Result<PathBuf> {
        let path = self.paths.series_file(anidb_id);

        self.ensure(
            DocumentKey::Series(anidb_id),
            &path,
            self.series_max_age,
            cancel,
            || self.refresh_series(anidb_id, &path, cancel),
        )
        .await?;

        Ok(path)
    }

    /// Path of a fresh title index
    pub async fn titles_document(&self, cancel: &CancellationToken) -> Result<PathBuf> {
        let path = self.paths.titles_file();

        self.ensure(DocumentKey::Titles, &path, self.titles_max_age, cancel, || {
            self.refresh_titles(&path, cancel)
        })
        .await?;

        Ok(path)
    }

    async fn refresh_titles(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        let document = self.client.fetch_titles(cancel).await?;
        write_atomic(path, &document).await?;
        info!(path = %path.display(), bytes = document.len(), "Title index cached");
        Ok(())
    }

    /// Fetch a series and rebuild its derived files
    ///
    /// Episode files are written before `series.xml` is replaced, so a fresh
    /// series document always comes with its episodes. If an episode file
    /// cannot be written the old series document stays in place and the next
    /// request fetches again.
    async fn refresh_series(&self, anidb_id: u32, path: &Path, cancel: &CancellationToken) -> Result<()> {
        let document = self.client.fetch_series(anidb_id, cancel).await?;

        self.write_episodes(anidb_id, &document).await?;
        write_atomic(path, &document).await?;
        info!(anidb_id = anidb_id, bytes = document.len(), "Series document cached");

        let people = extract_people(&document, &self.image_base_url);
        let written = self.people.store_all(&people).await;
        debug!(anidb_id = anidb_id, found = people.len(), written = written, "People cached");

        Ok(())
    }

    /// Write the episode documents of a series, then drop episodes it no
    /// longer lists
    async fn write_episodes(&self, anidb_id: u32, document: &str) -> Result<()> {
        let fragments = split_episodes(document);
        let mut current = HashSet::with_capacity(fragments.len());

        for fragment in &fragments {
            let path = self.paths.episode_file(anidb_id, &fragment.key);
            write_atomic(&path, fragment.xml).await?;
            if let Some(name) = path.file_name() {
                current.insert(name.to_owned());
            }
        }

        debug!(anidb_id = anidb_id, episodes = fragments.len(), "Episode documents written");

        if let Err(e) = self.prune_episode_files(anidb_id, &current).await {
            warn!(anidb_id = anidb_id, error = %e, "Failed to remove obsolete episode documents");
        }

        Ok(())
    }

    /// Remove episode files whose name is not in `keep`
    ///
    /// Keeps going past files it cannot remove and reports the first failure.
    async fn prune_episode_files(&self, anidb_id: u32, keep: &HashSet<OsString>) -> Result<()> {
        let dir = self.paths.series_dir(anidb_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut first_error = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if keep.contains(&name) || !CachePaths::is_episode_file(&name.to_string_lossy()) {
                continue;
            }

            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                debug!(path = %entry.path().display(), error = %e, "Episode document not removed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Stored episode document for a file key, if any
    pub async fn episode_document(&self, anidb_id: u32, key: &str) -> Result<Option<String>> {
        let path = self.paths.episode_file(anidb_id, key);

        match tokio::fs::read_to_string(&path).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{unlimited, FakeTransport};
    use tempfile::TempDir;

    const SERIES: &str = r#"<anime id="7">
    <titles><title xml:lang="x-jat" type="main">Test Anime</title></titles>
    <characters>
        <character id="1"><name>Hero</name><seiyuu id="3" picture="3.jpg">Seki Tomokazu</seiyuu></character>
    </characters>
    <episodes>
        <episode id="70"><epno type="1">1</epno><title xml:lang="en">One</title></episode>
        <episode id="71"><epno type="2">S1</epno><title xml:lang="en">Special</title></episode>
    </episodes>
</anime>"#;

    fn store(temp_dir: &TempDir, transport: Arc<FakeTransport>) -> CacheStore {
        let config = shared::Config::default().anidb;
        let client = AniDbClient::new(transport, unlimited(), &config);
        CacheStore::new(CachePaths::new(temp_dir.path()), Arc::new(client), &config)
    }

    fn backdate(path: &Path, days: u64) -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY))
    }

    #[tokio::test]
    async fn test_fetch_writes_documents() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());

        let path = store.series_document(7, &CancellationToken::new()).await?;

        assert_eq!(path, temp_dir.path().join("anidb/series/7/series.xml"));
        assert_eq!(std::fs::read_to_string(&path)?, SERIES);
        assert!(store.episode_document(7, "1").await?.is_some());
        assert!(store.episode_document(7, "S1").await?.is_some());
        assert!(store.episode_document(7, "2").await?.is_none());
        assert!(store.people().lookup("Tomokazu Seki").await.is_some());
        let leftovers = std::fs::read_dir(temp_dir.path().join("anidb/series/7"))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_document_is_reused() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 1)?;
        store.series_document(7, &cancel).await?;

        assert_eq!(transport.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_document_single_refetch() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(50)));
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 8)?;

        let (first, second) = tokio::join!(
            store.series_document(7, &cancel),
            store.series_document(7, &cancel)
        );
        first?;
        second?;

        // The initial fetch plus exactly one refresh
        assert_eq!(transport.calls(), 2);
        assert_eq!(store.pending_locks(), 0);
        assert!(is_fresh(&path, Duration::from_secs(SECONDS_PER_DAY)).await);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_document() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 8)?;

        transport.bodies.lock().unwrap().clear();
        transport.serve("aid=7", "<error>Banned</error>");

        let result = store.series_document(7, &cancel).await;
        assert!(matches!(result, Err(AniDbError::Service(_))));
        assert_eq!(std::fs::read_to_string(&path)?, SERIES);
        assert!(store.episode_document(7, "1").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_replaces_episode_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 8)?;

        let without_special = SERIES.replace(
            r#"<episode id="71"><epno type="2">S1</epno><title xml:lang="en">Special</title></episode>"#,
            "",
        );
        transport.bodies.lock().unwrap().clear();
        transport.serve("aid=7", without_special);

        store.series_document(7, &cancel).await?;
        assert!(store.episode_document(7, "1").await?.is_some());
        assert!(store.episode_document(7, "S1").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_obsolete_episode_that_cannot_be_removed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 8)?;

        // A directory under an episode file name cannot be removed as a file
        std::fs::create_dir(temp_dir.path().join("anidb/series/7/episode-9.xml"))?;

        let updated = SERIES
            .replace(">One<", ">One (new)<")
            .replace(
                r#"<episode id="71"><epno type="2">S1</epno><title xml:lang="en">Special</title></episode>"#,
                "",
            )
            .replace(
                "</episodes>",
                r#"<episode id="72"><epno type="1">2</epno><title xml:lang="en">Two</title></episode></episodes>"#,
            );
        transport.bodies.lock().unwrap().clear();
        transport.serve("aid=7", updated.clone());

        store.series_document(7, &cancel).await?;
        assert_eq!(std::fs::read_to_string(&path)?, updated);
        assert!(store
            .episode_document(7, "1")
            .await?
            .is_some_and(|xml| xml.contains("One (new)")));
        assert!(store.episode_document(7, "2").await?.is_some());
        assert!(store.episode_document(7, "S1").await?.is_none());

        store.series_document(7, &cancel).await?;
        assert_eq!(transport.calls(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_episode_write_keeps_previous_document() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.series_document(7, &cancel).await?;
        backdate(&path, 8)?;

        // Renaming a file onto a directory fails
        std::fs::create_dir(temp_dir.path().join("anidb/series/7/episode-2.xml"))?;

        let updated = SERIES.replace(
            "</episodes>",
            r#"<episode id="72"><epno type="1">2</epno><title xml:lang="en">Two</title></episode></episodes>"#,
        );
        transport.bodies.lock().unwrap().clear();
        transport.serve("aid=7", updated);

        assert!(store.series_document(7, &cancel).await.is_err());
        assert_eq!(std::fs::read_to_string(&path)?, SERIES);
        assert!(!is_fresh(&path, Duration::from_secs(7 * SECONDS_PER_DAY)).await);

        // Still stale, so the next request fetches again
        assert!(store.series_document(7, &cancel).await.is_err());
        assert_eq!(transport.calls(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_atomic_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("doc.xml");
        let first = "<a>".repeat(10_000);
        let second = "<b>".repeat(10_000);

        let (a, b) = tokio::join!(write_atomic(&path, &first), write_atomic(&path, &second));
        a?;
        b?;

        let stored = std::fs::read_to_string(&path)?;
        assert!(stored == first || stored == second);
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_titles_document() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::new());
        transport.serve(
            "anime-titles",
            crate::api::client::tests::gzip("<animetitles><anime aid=\"1\"></anime></animetitles>"),
        );
        let store = store(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let path = store.titles_document(&cancel).await?;
        store.titles_document(&cancel).await?;

        assert_eq!(
            std::fs::read_to_string(path)?,
            "<animetitles><anime aid=\"1\"></anime></animetitles>"
        );
        assert_eq!(transport.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_secs(60)));
        transport.serve("aid=7", SERIES);
        let store = store(&temp_dir, transport.clone());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = store.series_document(7, &cancel).await;
        assert!(matches!(result, Err(AniDbError::Cancelled)));
        assert!(!temp_dir.path().join("anidb/series/7").exists());
        assert_eq!(store.pending_locks(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_keyed_locks_cleanup() -> Result<()> {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let cancel = CancellationToken::new();

        {
            let _a = locks.lock(1, &cancel).await?;
            let _b = locks.lock(2, &cancel).await?;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());

        // A waiter that gives up does not leave an entry behind
        let held = locks.lock(1, &cancel).await?;
        let give_up = CancellationToken::new();
        give_up.cancel();
        assert!(matches!(
            locks.lock(1, &give_up).await,
            Err(AniDbError::Cancelled)
        ));
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_is_fresh_at() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("doc.xml");
        let week = Duration::from_secs(7 * SECONDS_PER_DAY);

        assert!(!is_fresh_at(&path, week, SystemTime::now()).await);

        write_atomic(&path, "<a/>").await?;
        let now = SystemTime::now();
        assert!(is_fresh_at(&path, week, now + Duration::from_secs(SECONDS_PER_DAY)).await);
        assert!(!is_fresh_at(&path, week, now + Duration::from_secs(8 * SECONDS_PER_DAY)).await);

        Ok(())
    }
}
