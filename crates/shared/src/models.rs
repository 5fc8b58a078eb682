//! Data models for the metadata provider.
//!
//! These are the normalized records handed to the media catalog: series,
//! episodes, people and images. All of them serialize to JSON for the CLI, and
//! [`PersonRecord`] is also persisted as XML in the shared people cache.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Name used for the AniDB provider in search results and images
pub const PROVIDER_NAME: &str = "AniDB";

/// Airing status of a series
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    #[default]
    Continuing,
    Ended,
}

impl std::fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesStatus::Continuing => write!(f, "continuing"),
            SeriesStatus::Ended => write!(f, "ended"),
        }
    }
}

/// Identifiers of the same item in other catalogs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalIds {
    pub anidb: Option<u32>,
    pub myanimelist: Option<u32>,
}

/// Series metadata parsed from an AniDB anime document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeriesRecord {
    pub anidb_id: u32,
    pub name: Option<String>,

    // Dates
    pub premiere_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub production_year: Option<i32>,
    pub status: SeriesStatus,

    pub community_rating: Option<f32>,
    pub overview: Option<String>,

    // Classifications
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub people: Vec<PersonRecord>,

    pub external_ids: ExternalIds,
    pub image_url: Option<String>,
    pub episode_count: Option<u32>,
}

impl SeriesRecord {
    /// Create an empty record for the given AniDB id
    pub fn new(anidb_id: u32) -> Self {
        Self {
            anidb_id,
            external_ids: ExternalIds {
                anidb: Some(anidb_id),
                myanimelist: None,
            },
            ..Default::default()
        }
    }

    /// Whether parsing extracted nothing usable
    ///
    /// The AniDB id alone does not count; every other field does.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.premiere_date.is_none()
            && self.end_date.is_none()
            && self.production_year.is_none()
            && self.community_rating.is_none()
            && self.overview.is_none()
            && self.genres.is_empty()
            && self.studios.is_empty()
            && self.people.is_empty()
            && self.external_ids.myanimelist.is_none()
            && self.image_url.is_none()
            && self.episode_count.is_none()
    }
}

/// Episode numbering class, from the `type` attribute of `epno`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    #[default]
    Regular,
    Special,
    Credit,
    Trailer,
    Parody,
    Other,
}

impl EpisodeType {
    /// Map the numeric AniDB code (1-6)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EpisodeType::Regular),
            2 => Some(EpisodeType::Special),
            3 => Some(EpisodeType::Credit),
            4 => Some(EpisodeType::Trailer),
            5 => Some(EpisodeType::Parody),
            6 => Some(EpisodeType::Other),
            _ => None,
        }
    }

    /// Letter AniDB puts in front of non-regular episode numbers
    pub fn prefix(&self) -> &'static str {
        match self {
            EpisodeType::Regular => "",
            EpisodeType::Special => "S",
            EpisodeType::Credit => "C",
            EpisodeType::Trailer => "T",
            EpisodeType::Parody => "P",
            EpisodeType::Other => "O",
        }
    }

    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_uppercase() {
            'S' => Some(EpisodeType::Special),
            'C' => Some(EpisodeType::Credit),
            'T' => Some(EpisodeType::Trailer),
            'P' => Some(EpisodeType::Parody),
            'O' => Some(EpisodeType::Other),
            _ => None,
        }
    }
}

/// Episode number together with its numbering class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EpisodeNumber {
    pub kind: EpisodeType,
    pub index: u32,
}

impl EpisodeNumber {
    pub fn regular(index: u32) -> Self {
        Self {
            kind: EpisodeType::Regular,
            index,
        }
    }

    pub fn special(index: u32) -> Self {
        Self {
            kind: EpisodeType::Special,
            index,
        }
    }

    /// Parse raw `epno` text such as "12" or "S3"
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let mut chars = raw.chars();
        let first = chars.next()?;

        if first.is_ascii_digit() {
            return raw.parse().ok().map(Self::regular);
        }

        let kind = EpisodeType::from_prefix(first)?;
        let index = chars.as_str().parse().ok()?;
        Some(Self { kind, index })
    }

    /// Key used for the per-episode cache file
    pub fn file_key(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.index)
    }
}

impl std::fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_key())
    }
}

/// Episode metadata parsed from a split episode document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpisodeRecord {
    pub anidb_id: Option<u32>,
    pub series_id: u32,
    pub number: Option<EpisodeNumber>,
    /// Last episode index when several episodes were merged
    pub index_end: Option<u32>,
    pub parent_index: Option<u32>,
    pub name: Option<String>,
    /// Runtime in minutes
    pub runtime_minutes: Option<u32>,
    pub premiere_date: Option<NaiveDate>,
    pub production_year: Option<i32>,
    pub community_rating: Option<f32>,
    pub overview: Option<String>,
}

/// Role of a person credited on a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PersonType {
    Director,
    Composer,
    Writer,
    Producer,
    Actor,
    GuestStar,
    Conductor,
    Lyricist,
}

impl PersonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonType::Director => "Director",
            PersonType::Composer => "Composer",
            PersonType::Writer => "Writer",
            PersonType::Producer => "Producer",
            PersonType::Actor => "Actor",
            PersonType::GuestStar => "GuestStar",
            PersonType::Conductor => "Conductor",
            PersonType::Lyricist => "Lyricist",
        }
    }
}

impl std::fmt::Display for PersonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PersonType {
    type Err = anyhow::Error;

    /// Case-insensitive match on the variant name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [PersonType; 8] = [
            PersonType::Director,
            PersonType::Composer,
            PersonType::Writer,
            PersonType::Producer,
            PersonType::Actor,
            PersonType::GuestStar,
            PersonType::Conductor,
            PersonType::Lyricist,
        ];

        ALL.into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Invalid person type: {}", s))
    }
}

impl From<PersonType> for String {
    fn from(kind: PersonType) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for PersonType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Cast or crew member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonRecord {
    pub name: String,
    pub kind: PersonType,
    /// Character name for voice actors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anidb_id: Option<u32>,
}

/// Image kinds offered by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Primary,
}

/// Remote image reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteImage {
    pub provider: String,
    pub url: String,
    pub kind: ImageKind,
}

/// Search result offered to the catalog for manual identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub provider: String,
    pub name: Option<String>,
    pub premiere_date: Option<NaiveDate>,
    pub production_year: Option<i32>,
    pub external_ids: ExternalIds,
}

impl From<&SeriesRecord> for SearchResult {
    fn from(series: &SeriesRecord) -> Self {
        Self {
            provider: PROVIDER_NAME.to_string(),
            name: series.name.clone(),
            premiere_date: series.premiere_date,
            production_year: series.production_year,
            external_ids: series.external_ids.clone(),
        }
    }
}
