//! Metadata provider facade.
//!
//! Ties the client, cache, parsers and resolver together behind the
//! operations a media catalog calls. Apart from cancellation, failures never
//! reach the caller: they are logged and the operation reports no metadata.

use crate::api::{AniDbClient, HttpResponse};
use crate::cache::CacheStore;
use crate::error::Result;
use crate::genres::GenreNormalizer;
use crate::parser::episode::episode_key;
use crate::parser::{find_episode_by_id, find_image_url, merge_range, parse_episode, parse_series, ParseOptions};
use crate::resolver::{clean_name, TitleIndex};
use shared::config::AniDbConfig;
use shared::{
    CachePaths, Config, EpisodeRecord, ImageKind, PersonRecord, RemoteImage, SearchResult,
    SeriesRecord, PROVIDER_NAME,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Most episode files merged for one multi-episode request
const MAX_EPISODE_SPAN: u32 = 100;

/// Everything the provider needs from configuration
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub cache_root: PathBuf,
    pub anidb: AniDbConfig,
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_root: config.cache_dir(),
            anidb: config.anidb.clone(),
        }
    }
}

/// Series lookup request
#[derive(Debug, Clone, Default)]
pub struct SeriesQuery {
    pub name: Option<String>,
    pub anidb_id: Option<u32>,
    /// Metadata languages in preference order
    pub languages: Vec<String>,
}

impl SeriesQuery {
    pub fn by_id(anidb_id: u32) -> Self {
        Self {
            anidb_id: Some(anidb_id),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Episode lookup request
#[derive(Debug, Clone, Default)]
pub struct EpisodeQuery {
    pub series_id: Option<u32>,
    /// AniDB episode id, takes precedence over the number
    pub episode_id: Option<u32>,
    pub index: Option<u32>,
    /// Last index of a multi-episode file
    pub index_end: Option<u32>,
    /// Season number; 0 selects specials
    pub parent_index: Option<u32>,
    pub languages: Vec<String>,
}

struct CachedIndex {
    modified: SystemTime,
    index: Arc<TitleIndex>,
}

/// AniDB metadata provider
pub struct AniDbProvider {
    store: CacheStore,
    config: AniDbConfig,
    genres: GenreNormalizer,
    titles: RwLock<Option<CachedIndex>>,
}

/// Keep cancellation, turn any other failure into `fallback`
fn recover<T>(result: Result<T>, operation: &str, fallback: T) -> Result<T> {
    match result {
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            warn!(operation = operation, error = %e, "AniDB lookup failed");
            Ok(fallback)
        }
        ok => ok,
    }
}

impl AniDbProvider {
    pub fn new(settings: ProviderSettings, client: Arc<AniDbClient>) -> Self {
        let store = CacheStore::new(CachePaths::new(&settings.cache_root), client, &settings.anidb);

        Self {
            store,
            genres: GenreNormalizer::new(settings.anidb.tidy_genre_list),
            config: settings.anidb,
            titles: RwLock::new(None),
        }
    }

    /// Provider talking to AniDB over reqwest
    pub fn from_settings(settings: ProviderSettings) -> Result<Self> {
        let client = AniDbClient::from_config(&settings.anidb)?;
        Ok(Self::new(settings, Arc::new(client)))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    fn parse_options(&self, languages: &[String]) -> ParseOptions {
        ParseOptions::from_config(&self.config).with_languages(languages)
    }

    // ========== Series ==========

    /// Metadata for a series identified by id or, failing that, by name
    pub async fn series_metadata(
        &self,
        query: &SeriesQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<SeriesRecord>> {
        let anidb_id = match query.anidb_id {
            Some(id) => Some(id),
            None => match query.name.as_deref() {
                Some(name) if !name.trim().is_empty() => self.resolve_id(name, cancel).await?,
                _ => None,
            },
        };

        let Some(anidb_id) = anidb_id else {
            debug!(name = ?query.name, "No AniDB id for series");
            return Ok(None);
        };

        let series = self.load_series(anidb_id, &query.languages, cancel).await;
        recover(series, "series_metadata", None)
    }

    async fn load_series(
        &self,
        anidb_id: u32,
        languages: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<SeriesRecord>> {
        let path = self.store.series_document(anidb_id, cancel).await?;
        let document = tokio::fs::read_to_string(&path).await?;

        let mut series = parse_series(&document, anidb_id, &self.parse_options(languages));
        series.genres = self.genres.cleanup(&series.genres);

        if series.is_empty() {
            warn!(anidb_id = anidb_id, "Series document held no metadata");
            return Ok(None);
        }

        info!(anidb_id = anidb_id, name = ?series.name, "Series metadata loaded");
        Ok(Some(series))
    }

    /// Candidates for manual identification
    pub async fn search(
        &self,
        query: &SeriesQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let series = self.series_metadata(query, cancel).await?;
        Ok(series.iter().map(SearchResult::from).collect())
    }

    /// Resolve a free-text name, retrying once with a cleaned name
    pub async fn resolve_id(&self, name: &str, cancel: &CancellationToken) -> Result<Option<u32>> {
        let index = match recover(self.title_index(cancel).await.map(Some), "resolve_id", None)? {
            Some(index) => index,
            None => return Ok(None),
        };

        if let Some(aid) = index.resolve(name, name) {
            debug!(name = name, aid = aid, "Resolved series name");
            return Ok(Some(aid));
        }

        let cleaned = clean_name(name);
        if cleaned.is_empty() || cleaned == name {
            return Ok(None);
        }

        let aid = index.resolve(&cleaned, &cleaned);
        debug!(name = name, cleaned = %cleaned, aid = ?aid, "Resolved cleaned series name");
        Ok(aid)
    }

    /// Parsed title index, reparsed only when the file changes
    async fn title_index(&self, cancel: &CancellationToken) -> Result<Arc<TitleIndex>> {
        let path = self.store.titles_document(cancel).await?;
        let modified = tokio::fs::metadata(&path).await?.modified()?;

        if let Some(cached) = self.titles.read().await.as_ref() {
            if cached.modified == modified {
                return Ok(cached.index.clone());
            }
        }

        let mut cached = self.titles.write().await;
        if let Some(current) = cached.as_ref() {
            if current.modified == modified {
                return Ok(current.index.clone());
            }
        }

        let text = tokio::fs::read_to_string(&path).await?;
        let index = Arc::new(TitleIndex::parse(&text));
        info!(blocks = index.len(), "Title index loaded");

        *cached = Some(CachedIndex {
            modified,
            index: index.clone(),
        });
        Ok(index)
    }

    // ========== Episodes ==========

    /// Metadata for one episode, or a merged range of episodes
    pub async fn episode_metadata(
        &self,
        query: &EpisodeQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<EpisodeRecord>> {
        let Some(series_id) = query.series_id else {
            return Ok(None);
        };
        if query.episode_id.is_none() && query.index.is_none() {
            return Ok(None);
        }

        let episode = self.load_episode(series_id, query, cancel).await;
        recover(episode, "episode_metadata", None)
    }

    async fn load_episode(
        &self,
        series_id: u32,
        query: &EpisodeQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<EpisodeRecord>> {
        let series_path = self.store.series_document(series_id, cancel).await?;
        let options = self.parse_options(&query.languages);

        let mut episode = if let Some(episode_id) = query.episode_id {
            let document = tokio::fs::read_to_string(&series_path).await?;
            find_episode_by_id(&document, episode_id)?
                .map(|xml| parse_episode(xml, series_id, &options))
        } else if let Some(index) = query.index {
            let requested = query.index_end.unwrap_or(index).max(index);
            let end = requested.min(index.saturating_add(MAX_EPISODE_SPAN - 1));
            if end < requested {
                warn!(series_id = series_id, index = index, index_end = requested, "Episode range clamped");
            }
            let mut episodes = Vec::new();

            for number in index..=end {
                let key = episode_key(number, query.parent_index);
                match self.store.episode_document(series_id, &key).await? {
                    Some(xml) => episodes.push(parse_episode(&xml, series_id, &options)),
                    None if number == index => break,
                    None => debug!(series_id = series_id, key = %key, "Episode missing from range"),
                }
            }

            merge_range(episodes)
        } else {
            None
        };

        if let Some(episode) = episode.as_mut() {
            episode.parent_index = query.parent_index;
        }

        debug!(series_id = series_id, found = episode.is_some(), "Episode lookup");
        Ok(episode)
    }

    // ========== Images & People ==========

    /// The series poster, if the document names one
    pub async fn series_images(
        &self,
        anidb_id: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteImage>> {
        let images = self.load_images(anidb_id, cancel).await;
        recover(images, "series_images", Vec::new())
    }

    async fn load_images(&self, anidb_id: u32, cancel: &CancellationToken) -> Result<Vec<RemoteImage>> {
        let path = self.store.series_document(anidb_id, cancel).await?;
        let document = tokio::fs::read_to_string(&path).await?;
        let url = find_image_url(&document, &self.config.image_base_url)?;

        Ok(url
            .map(|url| RemoteImage {
                provider: PROVIDER_NAME.to_string(),
                url,
                kind: ImageKind::Primary,
            })
            .into_iter()
            .collect())
    }

    /// Fetch an image through the shared rate limiter
    pub async fn image_response(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse> {
        self.store.client().fetch_image(url, cancel).await
    }

    /// Cached person by name
    pub async fn person(&self, name: &str) -> Option<PersonRecord> {
        self.store.people().lookup(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{gzip, unlimited, FakeTransport};
    use crate::error::AniDbError;
    use shared::{EpisodeNumber, PersonType, SeriesStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    const TITLES: &str = r#"<animetitles>
<anime aid="7"><title xml:lang="x-jat" type="main">Test Anime</title></anime>
<anime aid="8"><title xml:lang="x-jat" type="main">Other Show</title></anime>
</animetitles>"#;

    const SERIES: &str = r#"<anime id="7">
    <startdate>2005-04-03</startdate>
    <titles>
        <title xml:lang="x-jat" type="main">Test Anime</title>
        <title xml:lang="en" type="official">Test Anime EN</title>
    </titles>
    <picture>7.jpg</picture>
    <tags>
        <tag id="1" weight="500"><name>action</name></tag>
        <tag id="2" weight="600"><name>coming of age</name></tag>
    </tags>
    <characters>
        <character id="1"><name>Hero</name><seiyuu id="3" picture="3.jpg">Seki Tomokazu</seiyuu></character>
    </characters>
    <episodes>
        <episode id="70"><epno type="1">1</epno><length>24</length><title xml:lang="en">One</title></episode>
        <episode id="71"><epno type="1">2</epno><length>24</length><title xml:lang="en">Two</title></episode>
        <episode id="72"><epno type="2">S1</epno><length>5</length><title xml:lang="en">Extra</title></episode>
    </episodes>
</anime>"#;

    fn provider(temp_dir: &TempDir, transport: Arc<FakeTransport>) -> AniDbProvider {
        let mut config = Config::default();
        config.anidb.cache.cache_dir = temp_dir.path().to_string_lossy().to_string();

        let client = AniDbClient::new(transport, unlimited(), &config.anidb);
        AniDbProvider::new(ProviderSettings::from_config(&config), Arc::new(client))
    }

    fn serving() -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::new());
        transport.serve("aid=7", SERIES);
        transport.serve("anime-titles", gzip(TITLES));
        transport
    }

    fn english() -> Vec<String> {
        vec!["en".to_string()]
    }

    #[tokio::test]
    async fn test_series_by_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, serving());
        let cancel = CancellationToken::new();

        let query = SeriesQuery {
            languages: english(),
            ..SeriesQuery::by_name("Test Anime")
        };
        let series = provider
            .series_metadata(&query, &cancel)
            .await?
            .expect("series metadata");

        assert_eq!(series.anidb_id, 7);
        assert_eq!(series.name.as_deref(), Some("Test Anime EN"));
        assert_eq!(series.production_year, Some(2005));
        assert_eq!(series.status, SeriesStatus::Continuing);
        // Tidy by default: the unmapped tag is dropped
        assert_eq!(series.genres, vec!["Action"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_cleaned_name_retry() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, serving());
        let cancel = CancellationToken::new();

        assert_eq!(provider.resolve_id("[Group] Other_Show", &cancel).await?, Some(8));
        assert_eq!(provider.resolve_id("Unknown Thing", &cancel).await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_title_index_is_cached() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = serving();
        let provider = provider(&temp_dir, transport.clone());
        let cancel = CancellationToken::new();

        let first = provider.title_index(&cancel).await?;
        let second = provider.title_index(&cancel).await?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_become_empty_results() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, Arc::new(FakeTransport::new()));
        let cancel = CancellationToken::new();

        assert!(provider.series_metadata(&SeriesQuery::by_id(99), &cancel).await?.is_none());
        assert!(provider.search(&SeriesQuery::by_name("Anything"), &cancel).await?.is_empty());
        assert!(provider.series_images(99, &cancel).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_is_reported() {
        let temp_dir = TempDir::new().expect("temp dir");
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_secs(60)));
        let provider = provider(&temp_dir, transport);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = provider.series_metadata(&SeriesQuery::by_id(7), &cancel).await;
        assert!(matches!(result, Err(AniDbError::Cancelled)));
    }

    #[tokio::test]
    async fn test_episode_by_number_and_range() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, serving());
        let cancel = CancellationToken::new();

        let single = EpisodeQuery {
            series_id: Some(7),
            index: Some(1),
            parent_index: Some(1),
            languages: english(),
            ..Default::default()
        };
        let episode = provider.episode_metadata(&single, &cancel).await?.expect("episode");
        assert_eq!(episode.name.as_deref(), Some("One"));
        assert_eq!(episode.parent_index, Some(1));

        let range = EpisodeQuery {
            index_end: Some(2),
            ..single.clone()
        };
        let merged = provider.episode_metadata(&range, &cancel).await?.expect("range");
        assert_eq!(merged.name.as_deref(), Some("One / Two"));
        assert_eq!(merged.runtime_minutes, Some(48));
        assert_eq!(merged.index_end, Some(2));

        let special = EpisodeQuery {
            parent_index: Some(0),
            ..single.clone()
        };
        let extra = provider.episode_metadata(&special, &cancel).await?.expect("special");
        assert_eq!(extra.number, Some(EpisodeNumber::special(1)));

        let missing = EpisodeQuery {
            index: Some(9),
            ..single
        };
        assert!(provider.episode_metadata(&missing, &cancel).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_huge_episode_range_is_clamped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, serving());

        let query = EpisodeQuery {
            series_id: Some(7),
            index: Some(1),
            index_end: Some(u32::MAX),
            languages: english(),
            ..Default::default()
        };
        let merged = provider
            .episode_metadata(&query, &CancellationToken::new())
            .await?
            .expect("range");

        assert_eq!(merged.name.as_deref(), Some("One / Two"));
        assert_eq!(merged.index_end, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_episode_by_id() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let provider = provider(&temp_dir, serving());

        let query = EpisodeQuery {
            series_id: Some(7),
            episode_id: Some(71),
            languages: english(),
            ..Default::default()
        };
        let episode = provider
            .episode_metadata(&query, &CancellationToken::new())
            .await?
            .expect("episode");

        assert_eq!(episode.anidb_id, Some(71));
        assert_eq!(episode.name.as_deref(), Some("Two"));
        Ok(())
    }

    #[tokio::test]
    async fn test_images_and_people() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let transport = serving();
        transport.serve("7.jpg", b"jpeg".to_vec());
        let provider = provider(&temp_dir, transport);
        let cancel = CancellationToken::new();

        let images = provider.series_images(7, &cancel).await?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "http://img7.anidb.net/pics/anime/7.jpg");
        assert_eq!(images[0].provider, "AniDB");

        let response = provider.image_response(&images[0].url, &cancel).await?;
        assert_eq!(response.body, b"jpeg".to_vec());

        let person = provider.person("Tomokazu Seki").await.expect("cached person");
        assert_eq!(person.kind, PersonType::Actor);
        assert_eq!(person.role.as_deref(), Some("Hero"));

        Ok(())
    }
}
