//! Title selection.
//!
//! AniDB lists many titles per series and episode (romanized main title,
//! official translations, synonyms, short names). Exactly one is shown.

use shared::TitleLanguage;

/// Language tag AniDB uses for romanized Japanese
pub const ROMAJI_LANGUAGE: &str = "x-jat";

/// AniDB title type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleType {
    Main,
    Official,
    Synonym,
    Short,
    Other(String),
}

impl TitleType {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("main") => TitleType::Main,
            Some(v) if v.eq_ignore_ascii_case("official") => TitleType::Official,
            Some(v) if v.eq_ignore_ascii_case("synonym") || v.eq_ignore_ascii_case("syn") => {
                TitleType::Synonym
            }
            Some(v) if v.eq_ignore_ascii_case("short") => TitleType::Short,
            Some(v) => TitleType::Other(v.to_string()),
            None => TitleType::Other(String::new()),
        }
    }
}

/// One title variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title {
    pub language: Option<String>,
    pub kind: TitleType,
    pub name: String,
}

impl Title {
    pub fn new(language: Option<&str>, kind: TitleType, name: impl Into<String>) -> Self {
        Self {
            language: language
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            kind,
            name: name.into(),
        }
    }
}

/// Position of the first caller language matching `language`
///
/// "en" matches a caller's "en" or "en-US"; private tags such as "x-jat" only
/// match exactly.
fn language_rank(language: &str, requested: &[String]) -> Option<usize> {
    requested.iter().position(|wanted| {
        if wanted.eq_ignore_ascii_case(language) {
            return true;
        }
        let primary = wanted.split(['-', '_']).next().unwrap_or(wanted);
        !language.contains('-') && primary.eq_ignore_ascii_case(language)
    })
}

fn first_of_kind<'a>(titles: &[&'a Title], kind: &TitleType) -> Option<&'a Title> {
    titles.iter().copied().find(|t| &t.kind == kind)
}

/// Pick the display title
///
/// With [`TitleLanguage::Romaji`] the main `x-jat` title wins outright.
/// Otherwise titles without a language or in one of the caller's languages
/// are considered in the caller's order, preferring main, then official,
/// then synonym. When none qualify, fall back to any main, any official, or
/// the first title.
pub fn localize<'a>(
    titles: &'a [Title],
    languages: &[String],
    preference: TitleLanguage,
) -> Option<&'a Title> {
    if preference == TitleLanguage::Romaji {
        let romaji = titles.iter().find(|t| {
            t.kind == TitleType::Main
                && t.language
                    .as_deref()
                    .is_some_and(|l| l.eq_ignore_ascii_case(ROMAJI_LANGUAGE))
        });
        if romaji.is_some() {
            return romaji;
        }
    }

    let mut matching: Vec<(usize, &Title)> = titles
        .iter()
        .filter_map(|t| match t.language.as_deref() {
            None => Some((usize::MAX, t)),
            Some(language) => language_rank(language, languages).map(|rank| (rank, t)),
        })
        .collect();
    matching.sort_by_key(|(rank, _)| *rank);
    let matching: Vec<&Title> = matching.into_iter().map(|(_, t)| t).collect();

    let localized = first_of_kind(&matching, &TitleType::Main)
        .or_else(|| first_of_kind(&matching, &TitleType::Official))
        .or_else(|| first_of_kind(&matching, &TitleType::Synonym));
    if localized.is_some() {
        return localized;
    }

    let all: Vec<&Title> = titles.iter().collect();
    first_of_kind(&all, &TitleType::Main)
        .or_else(|| first_of_kind(&all, &TitleType::Official))
        .or_else(|| titles.first())
}
