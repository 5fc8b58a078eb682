//! Episode documents.
//!
//! Episodes are sliced verbatim out of the series document and stored one
//! file per `epno`, then parsed on demand.

use super::ParseOptions;
use crate::error::Result;
use crate::text::{clean_description, parse_date, parse_rating};
use crate::titles::{localize, Title, TitleType};
use crate::xml::{XmlCursor, XmlEvent};
use chrono::Datelike;
use shared::{EpisodeNumber, EpisodeRecord, EpisodeType};
use std::collections::HashSet;
use tracing::warn;

/// One `<episode>` element cut out of a series document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeFragment<'a> {
    /// Raw `epno` text, used as the file key
    pub key: String,
    pub anidb_id: Option<u32>,
    pub xml: &'a str,
}

/// File key for an episode requested by number
///
/// Season 0 holds the specials, stored as `S<n>`.
pub fn episode_key(index: u32, parent_index: Option<u32>) -> String {
    match parent_index {
        Some(0) => EpisodeNumber::special(index).file_key(),
        _ => EpisodeNumber::regular(index).file_key(),
    }
}

/// Every episode of a series document, first occurrence of each key only
pub fn split_episodes(document: &str) -> Vec<EpisodeFragment<'_>> {
    let mut fragments = Vec::new();

    if let Err(e) = collect_fragments(document, &mut fragments) {
        warn!(error = %e, found = fragments.len(), "Malformed document while splitting episodes");
    }

    let mut seen = HashSet::new();
    fragments.retain(|fragment| {
        let first = seen.insert(fragment.key.clone());
        if !first {
            warn!(key = %fragment.key, "Duplicate episode number, keeping the first");
        }
        first
    });

    fragments
}

fn collect_fragments<'a>(document: &'a str, fragments: &mut Vec<EpisodeFragment<'a>>) -> Result<()> {
    for_each_episode(document, |anidb_id, xml| {
        match episode_number_text(xml) {
            Some(key) => fragments.push(EpisodeFragment { key, anidb_id, xml }),
            None => warn!(anidb_id = ?anidb_id, "Episode without number, skipping"),
        }
        true
    })
}

/// Visit each `<anime><episodes><episode>` slice until `visit` returns false
fn for_each_episode<'a>(
    document: &'a str,
    mut visit: impl FnMut(Option<u32>, &'a str) -> bool,
) -> Result<()> {
    let mut cursor = XmlCursor::new(document);
    if cursor.root()?.is_none() {
        return Ok(());
    }

    let depth = cursor.depth();
    while let Some(event) = cursor.next_in(depth)? {
        let XmlEvent::Start(element) = event else {
            continue;
        };
        if !element.is("episodes") {
            cursor.skip_element()?;
            continue;
        }

        let episodes_depth = cursor.depth();
        while let Some(event) = cursor.next_in(episodes_depth)? {
            let XmlEvent::Start(episode) = event else {
                continue;
            };
            if !episode.is("episode") {
                cursor.skip_element()?;
                continue;
            }

            let xml = cursor.read_outer(&episode)?;
            if !visit(episode.attr_parsed("id"), xml) {
                return Ok(());
            }
        }
    }

    Ok(())
}

fn episode_number_text(fragment: &str) -> Option<String> {
    let mut cursor = XmlCursor::new(fragment);
    cursor.root().ok()??;

    let depth = cursor.depth();
    while let Ok(Some(event)) = cursor.next_in(depth) {
        if let XmlEvent::Start(element) = event {
            if element.is("epno") {
                let text = cursor.read_text().ok()?;
                let text = text.trim();
                return (!text.is_empty()).then(|| text.to_string());
            }
            cursor.skip_element().ok()?;
        }
    }

    None
}

/// Episode slice with the given AniDB episode id
pub fn find_episode_by_id(document: &str, episode_id: u32) -> Result<Option<&str>> {
    let mut found = None;

    for_each_episode(document, |anidb_id, xml| {
        if anidb_id == Some(episode_id) {
            found = Some(xml);
            return false;
        }
        true
    })?;

    Ok(found)
}

/// Parse one episode document
pub fn parse_episode(fragment: &str, series_id: u32, options: &ParseOptions) -> EpisodeRecord {
    let mut episode = EpisodeRecord {
        series_id,
        ..Default::default()
    };
    let mut titles = Vec::new();

    if let Err(e) = read_episode(fragment, &mut episode, &mut titles) {
        warn!(series_id = series_id, error = %e, "Malformed episode document, keeping partial record");
    }

    episode.name = localize(&titles, &options.languages, options.title_language)
        .map(|title| title.name.clone());
    episode
}

fn read_episode(fragment: &str, episode: &mut EpisodeRecord, titles: &mut Vec<Title>) -> Result<()> {
    let mut cursor = XmlCursor::new(fragment);
    let Some(root) = cursor.root()? else {
        return Ok(());
    };
    episode.anidb_id = root.attr_parsed("id");

    let depth = cursor.depth();
    while let Some(event) = cursor.next_in(depth)? {
        let XmlEvent::Start(element) = event else {
            continue;
        };

        match element.name() {
            "epno" => {
                let kind = element.attr_parsed::<u8>("type").and_then(EpisodeType::from_code);
                episode.number = EpisodeNumber::parse(&cursor.read_text()?).map(|mut number| {
                    if let Some(kind) = kind {
                        number.kind = kind;
                    }
                    number
                });
            }
            "length" => {
                episode.runtime_minutes = cursor.read_text()?.trim().parse().ok();
            }
            "airdate" => {
                if let Some(date) = parse_date(&cursor.read_text()?) {
                    episode.premiere_date = Some(date);
                    episode.production_year = Some(date.year());
                }
            }
            "rating" => {
                let has_votes = element.attr_parsed::<u32>("votes").is_some();
                let text = cursor.read_text()?;
                if has_votes {
                    episode.community_rating = parse_rating(&text);
                }
            }
            "title" => {
                let name = cursor.read_text()?;
                titles.push(Title::new(element.attr("xml:lang"), TitleType::Main, name));
            }
            "summary" => {
                let overview = clean_description(&cursor.read_text()?);
                if !overview.is_empty() {
                    episode.overview = Some(overview);
                }
            }
            _ => cursor.skip_element()?,
        }
    }

    Ok(())
}

/// Combine consecutive episodes into one record
///
/// Runtimes are summed and names joined with " / "; everything else comes
/// from the first episode.
pub fn merge_range(episodes: Vec<EpisodeRecord>) -> Option<EpisodeRecord> {
    let mut iter = episodes.into_iter();
    let mut merged = iter.next()?;
    let mut names: Vec<String> = merged.name.take().into_iter().collect();

    for episode in iter {
        if let Some(runtime) = episode.runtime_minutes {
            merged.runtime_minutes = Some(merged.runtime_minutes.unwrap_or(0).saturating_add(runtime));
        }
        names.extend(episode.name);
        if let Some(number) = episode.number {
            merged.index_end = Some(number.index);
        }
    }

    if !names.is_empty() {
        merged.name = Some(names.join(" / "));
    }

    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SERIES: &str = r#"<anime id="23">
    <titles><title xml:lang="x-jat" type="main">Cowboy Bebop</title></titles>
    <episodes>
        <episode id="101" update="2011-07-01">
            <epno type="1">1</epno>
            <length>25</length>
            <airdate>1998-10-24</airdate>
            <rating votes="20">8.43</rating>
            <title xml:lang="ja">アステロイド・ブルース</title>
            <title xml:lang="en">Asteroid Blues</title>
            <summary>http://anidb.net/ch2 [Spike] and http://anidb.net/ch3 [Jet] chase a dealer.
Source: ANN</summary>
        </episode>
        <episode id="102">
            <epno type="1">2</epno>
            <length>24</length>
            <rating>9.00</rating>
            <title xml:lang="en">Stray Dog Strut</title>
        </episode>
        <episode id="103">
            <epno type="2">S1</epno>
            <length>5</length>
            <title xml:lang="en">Session XX</title>
        </episode>
        <episode id="104">
            <epno type="1">1</epno>
            <title xml:lang="en">Duplicate</title>
        </episode>
    </episodes>
</anime>"#;

    fn options() -> ParseOptions {
        ParseOptions::new("http://img/").with_languages(&["en".to_string()])
    }

    #[test]
    fn test_split_episodes() {
        let fragments = split_episodes(SERIES);

        let keys: Vec<_> = fragments.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2", "S1"]);
        assert_eq!(fragments[0].anidb_id, Some(101));
        assert!(fragments[0].xml.starts_with("<episode id=\"101\""));
        assert!(fragments[0].xml.ends_with("</episode>"));
        assert!(!fragments[0].xml.contains("Duplicate"));
    }

    #[test]
    fn test_parse_episode() {
        let fragments = split_episodes(SERIES);
        let episode = parse_episode(fragments[0].xml, 23, &options());

        assert_eq!(episode.anidb_id, Some(101));
        assert_eq!(episode.series_id, 23);
        assert_eq!(episode.number, Some(EpisodeNumber::regular(1)));
        assert_eq!(episode.name.as_deref(), Some("Asteroid Blues"));
        assert_eq!(episode.runtime_minutes, Some(25));
        assert_eq!(episode.premiere_date, NaiveDate::from_ymd_opt(1998, 10, 24));
        assert_eq!(episode.production_year, Some(1998));
        assert_eq!(episode.community_rating, Some(8.4));
        assert_eq!(episode.overview.as_deref(), Some("Spike and Jet chase a dealer."));
    }

    #[test]
    fn test_rating_requires_votes() {
        let fragments = split_episodes(SERIES);
        let episode = parse_episode(fragments[1].xml, 23, &options());
        assert_eq!(episode.community_rating, None);
    }

    #[test]
    fn test_special_number() {
        let fragments = split_episodes(SERIES);
        let episode = parse_episode(fragments[2].xml, 23, &options());
        assert_eq!(episode.number, Some(EpisodeNumber::special(1)));
        assert_eq!(episode_key(1, Some(0)), "S1");
        assert_eq!(episode_key(1, Some(1)), "1");
        assert_eq!(episode_key(3, None), "3");
    }

    #[test]
    fn test_find_episode_by_id() -> Result<()> {
        let fragment = find_episode_by_id(SERIES, 102)?.map(|xml| parse_episode(xml, 23, &options()));
        assert_eq!(
            fragment.and_then(|e| e.name),
            Some("Stray Dog Strut".to_string())
        );
        assert_eq!(find_episode_by_id(SERIES, 999)?, None);
        Ok(())
    }

    #[test]
    fn test_merge_range() {
        let fragments = split_episodes(SERIES);
        let episodes = fragments[..2]
            .iter()
            .map(|f| parse_episode(f.xml, 23, &options()))
            .collect();

        let merged = merge_range(episodes).expect("merged episode");
        assert_eq!(merged.name.as_deref(), Some("Asteroid Blues / Stray Dog Strut"));
        assert_eq!(merged.runtime_minutes, Some(49));
        assert_eq!(merged.index_end, Some(2));
        assert_eq!(merged.number, Some(EpisodeNumber::regular(1)));
        assert_eq!(merged.community_rating, Some(8.4));

        assert!(merge_range(Vec::new()).is_none());
    }

    #[test]
    fn test_merge_range_saturates_runtime() {
        let long = r#"<episode id="1"><epno type="1">1</epno><length>4294967295</length></episode>"#;
        let short = r#"<episode id="2"><epno type="1">2</epno><length>1</length></episode>"#;
        let episodes = [long, short]
            .iter()
            .map(|xml| parse_episode(xml, 23, &options()))
            .collect();

        let merged = merge_range(episodes).expect("merged episode");
        assert_eq!(merged.runtime_minutes, Some(u32::MAX));
        assert_eq!(merged.index_end, Some(2));
    }
}
