//! AniDB metadata provider library.
//!
//! This library fetches anime series and episode metadata from AniDB, keeps
//! a local document cache that respects AniDB's strict request limits, and
//! maps the XML documents onto the catalog records in [`shared::models`].

pub mod api;
pub mod cache;
pub mod error;
pub mod genres;
pub mod parser;
pub mod people;
pub mod provider;
pub mod resolver;
pub mod text;
pub mod titles;
pub mod xml;

pub use api::{AniDbClient, HttpResponse, HttpTransport, RateLimiter, ReqwestTransport};
pub use cache::{CacheStore, KeyedLocks};
pub use error::{AniDbError, Result};
pub use genres::GenreNormalizer;
pub use parser::ParseOptions;
pub use people::PersonCache;
pub use provider::{AniDbProvider, EpisodeQuery, ProviderSettings, SeriesQuery};
pub use resolver::TitleIndex;
pub use titles::{Title, TitleType};
