//! Tag to genre policy.
//!
//! AniDB has no genres, only a large weighted tag tree. In tidy mode a fixed
//! table maps known tags to a small genre vocabulary regardless of weight;
//! otherwise any tag weighted 400 or more becomes a genre as-is.

use crate::text::title_case;
use std::collections::HashSet;

/// Tag ids (and parent ids) that never produce a genre
pub const IGNORED_TAG_IDS: [u32; 13] = [6, 22, 23, 60, 128, 129, 185, 216, 242, 255, 268, 269, 289];

/// Minimum weight for an unmapped tag to count as a genre
pub const MIN_TAG_WEIGHT: i32 = 400;

const TAGS_TO_GENRE: &[(&str, &str)] = &[
    ("action", "Action"),
    ("adventure", "Adventure"),
    ("comedy", "Comedy"),
    ("dementia", "Dementia"),
    ("demon", "Demons"),
    ("melodrama", "Drama"),
    ("ecchi", "Ecchi"),
    ("fantasy", "Fantasy"),
    ("dark fantasy", "Fantasy"),
    ("game", "Game"),
    ("harem", "Harem"),
    ("18 restricted", "Hentai"),
    ("erotic game", "Hentai"),
    ("sex", "Hentai"),
    ("historical", "Historical"),
    ("horror", "Horror"),
    ("josei", "Josei"),
    ("magic", "Magic"),
    ("martial arts", "Martial Arts"),
    ("mecha", "Mecha"),
    ("military", "Military"),
    ("motorsport", "Motorsport"),
    ("music", "Music"),
    ("mystery", "Mystery"),
    ("parody", "Parody"),
    ("cops", "Police"),
    ("psychological", "Psychological"),
    ("romance", "Romance"),
    ("samurai", "Samurai"),
    ("school", "School"),
    ("science fiction", "Sci-Fi"),
    ("seinen", "Seinen"),
    ("shoujo", "Shoujo"),
    ("shoujo ai", "Shoujo Ai"),
    ("shounen", "Shounen"),
    ("shounen ai", "Shounen Ai"),
    ("daily life", "Slice of Life"),
    ("space", "Space"),
    ("alien", "Space"),
    ("space travel", "Space"),
    ("sports", "Sports"),
    ("super power", "Super Power"),
    ("contemporary fantasy", "Supernatural"),
    ("thriller", "Thriller"),
    ("vampire", "Vampire"),
    ("yaoi", "Yaoi"),
    ("yuri", "Yuri"),
];

/// A `<tag>` as read from the series document
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTag {
    pub name: String,
    pub weight: i32,
    pub id: Option<u32>,
    pub parent_id: Option<u32>,
}

impl WeightedTag {
    fn is_ignored(&self) -> bool {
        [self.id, self.parent_id]
            .iter()
            .flatten()
            .any(|id| IGNORED_TAG_IDS.contains(id))
    }
}

/// Genre for a tag name in the controlled vocabulary
fn mapped_genre(tag: &str) -> Option<&'static str> {
    let tag = tag.trim();
    TAGS_TO_GENRE
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(tag))
        .map(|(_, genre)| *genre)
}

/// The vocabulary spelling of a genre that already is canonical
fn canonical_genre(genre: &str) -> Option<&'static str> {
    let genre = genre.trim();
    TAGS_TO_GENRE
        .iter()
        .find(|(_, canonical)| canonical.eq_ignore_ascii_case(genre))
        .map(|(_, canonical)| *canonical)
}

fn dedupe(genres: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    genres
        .into_iter()
        .filter(|g| seen.insert(g.to_lowercase()))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct GenreNormalizer {
    tidy: bool,
}

impl GenreNormalizer {
    pub fn new(tidy: bool) -> Self {
        Self { tidy }
    }

    pub fn is_tidy(&self) -> bool {
        self.tidy
    }

    /// Genre produced by a single tag, if any
    fn genre_for(&self, tag: &WeightedTag) -> Option<String> {
        if tag.is_ignored() {
            return None;
        }

        if self.tidy {
            mapped_genre(&tag.name).map(str::to_string)
        } else if tag.weight >= MIN_TAG_WEIGHT {
            Some(title_case(tag.name.trim()))
        } else {
            None
        }
    }

    /// Turn the tags of one series into its genre list
    ///
    /// Ordered by ascending tag weight (stable), duplicates removed keeping
    /// the first occurrence.
    pub fn from_tags(&self, tags: &[WeightedTag]) -> Vec<String> {
        let mut weighted: Vec<(i32, String)> = tags
            .iter()
            .filter_map(|tag| self.genre_for(tag).map(|genre| (tag.weight, genre)))
            .collect();
        weighted.sort_by_key(|(weight, _)| *weight);

        dedupe(weighted.into_iter().map(|(_, genre)| genre))
    }

    /// Post-process an already populated genre list
    ///
    /// Tidy mode keeps only vocabulary genres. Running it twice changes
    /// nothing.
    pub fn cleanup(&self, genres: &[String]) -> Vec<String> {
        if !self.tidy {
            return dedupe(genres.iter().cloned());
        }

        dedupe(genres.iter().filter_map(|genre| {
            canonical_genre(genre)
                .or_else(|| mapped_genre(genre))
                .map(str::to_string)
        }))
    }
}

impl Default for GenreNormalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, weight: i32) -> WeightedTag {
        WeightedTag {
            name: name.to_string(),
            weight,
            id: None,
            parent_id: None,
        }
    }

    #[test]
    fn test_tidy_maps_regardless_of_weight() {
        let genres = GenreNormalizer::new(true).from_tags(&[tag("action", 50)]);
        assert_eq!(genres, vec!["Action"]);
    }

    #[test]
    fn test_untidy_weight_threshold() {
        let normalizer = GenreNormalizer::new(false);
        assert!(normalizer.from_tags(&[tag("action", 50)]).is_empty());
        assert_eq!(normalizer.from_tags(&[tag("action", 450)]), vec!["Action"]);
        assert_eq!(
            normalizer.from_tags(&[tag("coming of age", 400)]),
            vec!["Coming Of Age"]
        );
    }

    #[test]
    fn test_tidy_drops_unmapped_tags() {
        let genres = GenreNormalizer::new(true).from_tags(&[tag("coming of age", 600)]);
        assert!(genres.is_empty());
    }

    #[test]
    fn test_dedupe_keeps_lowest_weight_first() {
        let genres = GenreNormalizer::new(true).from_tags(&[
            tag("space travel", 500),
            tag("comedy", 300),
            tag("alien", 100),
        ]);
        assert_eq!(genres, vec!["Space", "Comedy"]);
    }

    #[test]
    fn test_ignored_ids() {
        let mut by_id = tag("action", 600);
        by_id.id = Some(6);
        let mut by_parent = tag("comedy", 600);
        by_parent.parent_id = Some(289);
        let kept = WeightedTag {
            id: Some(7),
            parent_id: Some(8),
            ..tag("horror", 600)
        };

        let genres = GenreNormalizer::new(true).from_tags(&[by_id, by_parent, kept]);
        assert_eq!(genres, vec!["Horror"]);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let normalizer = GenreNormalizer::new(true);
        let raw: Vec<String> = ["science fiction", "Sci-Fi", "ACTION", "Mahou", "daily life"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let once = normalizer.cleanup(&raw);
        assert_eq!(once, vec!["Sci-Fi", "Action", "Slice of Life"]);
        assert_eq!(normalizer.cleanup(&once), once);
    }

    #[test]
    fn test_cleanup_untidy_only_dedupes() {
        let normalizer = GenreNormalizer::new(false);
        let raw = vec!["Mahou".to_string(), "mahou".to_string(), "Action".to_string()];
        assert_eq!(normalizer.cleanup(&raw), vec!["Mahou", "Action"]);
    }
}
