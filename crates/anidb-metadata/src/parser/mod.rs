//! Single-pass readers for AniDB series and episode documents.

pub mod episode;
pub mod series;

pub use episode::{find_episode_by_id, merge_range, parse_episode, split_episodes};
pub use series::{find_image_url, parse_series};

use crate::genres::GenreNormalizer;
use chrono::NaiveDate;
use shared::config::AniDbConfig;
use shared::TitleLanguage;

/// Caller context that shapes a parse
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Metadata languages in preference order
    pub languages: Vec<String>,
    pub title_language: TitleLanguage,
    pub genres: GenreNormalizer,
    /// Prefix for `picture` file names
    pub image_base_url: String,
    /// Reference date for airing status
    pub today: NaiveDate,
}

impl ParseOptions {
    pub fn new(image_base_url: impl Into<String>) -> Self {
        Self {
            languages: Vec::new(),
            title_language: TitleLanguage::default(),
            genres: GenreNormalizer::default(),
            image_base_url: image_base_url.into(),
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn from_config(config: &AniDbConfig) -> Self {
        Self {
            title_language: config.title_language,
            genres: GenreNormalizer::new(config.tidy_genre_list),
            ..Self::new(config.image_base_url.clone())
        }
    }

    pub fn with_languages(mut self, languages: &[String]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }
}
