//! Name to AniDB id resolution over the bulk title index.
//!
//! The index (`anime-titles.xml`) is one `<anime aid="N">` block per series
//! listing every known title. Resolution is two staged: a cheap substring
//! prefilter over the raw blocks, then a structured comparison of each
//! candidate's titles.

use crate::xml::{XmlCursor, XmlEvent};
use std::collections::HashSet;
use tracing::debug;

const BLOCK_START: &str = "<anime aid=\"";
const BLOCK_END: &str = "</anime>";

/// Shortest prefix used by the substring prefilter
const MIN_PREFIX_CHARS: usize = 4;

/// One `<anime>` block of the title index
#[derive(Debug, Clone)]
struct TitleBlock {
    aid: u32,
    text: String,
    lower: String,
}

/// Parsed title index
#[derive(Debug, Clone, Default)]
pub struct TitleIndex {
    blocks: Vec<TitleBlock>,
}

impl TitleIndex {
    /// Split the dump into blocks; malformed blocks are dropped
    pub fn parse(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(BLOCK_START) {
            let block = &rest[start..];
            let attr = &block[BLOCK_START.len()..];

            let Some(quote) = attr.find('"') else {
                break;
            };
            let end = block
                .find(BLOCK_END)
                .map(|end| end + BLOCK_END.len())
                .unwrap_or(block.len());

            if let Ok(aid) = attr[..quote].parse() {
                let text = block[..end].to_string();
                blocks.push(TitleBlock {
                    aid,
                    lower: text.to_lowercase(),
                    text,
                });
            }

            rest = &block[end.max(BLOCK_START.len())..];
        }

        debug!(blocks = blocks.len(), "Parsed title index");
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All titles of one series
    pub fn titles(&self, aid: u32) -> Vec<String> {
        self.blocks
            .iter()
            .find(|block| block.aid == aid)
            .map(|block| block_titles(&block.text))
            .unwrap_or_default()
    }

    /// Blocks containing the prefix of `a`, then of `b`, first seen first
    fn candidates(&self, a: &str, b: &str) -> Vec<&TitleBlock> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for name in [a, b] {
            let needle = prefix(name).to_lowercase();
            if needle.trim().is_empty() {
                continue;
            }
            for block in &self.blocks {
                if block.lower.contains(&needle) && seen.insert(block.aid) {
                    candidates.push(block);
                }
            }
        }

        candidates
    }

    /// Resolve a pair of names (usually the same name twice) to an AniDB id
    pub fn resolve(&self, a: &str, b: &str) -> Option<u32> {
        let candidates = self.candidates(a, b);
        debug!(a = a, b = b, candidates = candidates.len(), "Title prefilter");

        match candidates.as_slice() {
            [] => return None,
            [only] => return Some(only.aid),
            _ => {}
        }

        if !a.is_empty() && a.to_lowercase() == b.to_lowercase() {
            let mut best: Option<(usize, u32)> = None;
            for block in &candidates {
                let count = block.text.matches(a).count();
                if count > best.map_or(0, |(most, _)| most) {
                    best = Some((count, block.aid));
                }
            }
            if let Some((count, aid)) = best {
                debug!(aid = aid, occurrences = count, "Resolved by occurrence count");
                return Some(aid);
            }
        }

        candidates.iter().find_map(|block| {
            let titles = block_titles(&block.text);
            (titles_match(&titles, a) && titles_match(&titles, b)).then_some(block.aid)
        })
    }
}

/// Leading part of a name used for the prefilter
///
/// The first `max(4, len - len / 2)` characters, or the whole name when it
/// is shorter than four characters.
pub fn prefix(name: &str) -> &str {
    let len = name.chars().count();
    if len < MIN_PREFIX_CHARS {
        return name;
    }

    let take = MIN_PREFIX_CHARS.max(len - len / 2);
    match name.char_indices().nth(take) {
        Some((byte, _)) => &name[..byte],
        None => name,
    }
}

fn block_titles(block: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut cursor = XmlCursor::new(block);

    while let Ok(Some(event)) = cursor.next_event() {
        if let XmlEvent::Start(element) = event {
            if element.is("title") {
                match cursor.read_text() {
                    Ok(text) => titles.push(text),
                    Err(_) => break,
                }
            }
        }
    }

    titles
}

/// First run of four ASCII digits
fn find_year(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|start| &text[start..start + 4])
}

/// Whether any of a series' titles matches `name`
///
/// A year in the name has to agree with the first year found among the
/// titles; when no title carries a year, the year is ignored.
fn titles_match(titles: &[String], name: &str) -> bool {
    let title_year = find_year(name).and_then(|_| titles.iter().find_map(|t| find_year(t)));

    if let (Some(name_year), Some(title_year)) = (find_year(name), title_year) {
        if name_year != title_year {
            return false;
        }
    }

    titles.iter().any(|title| names_match(title, name))
}

/// Lower-case, punctuation to spaces, whitespace collapsed
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn without_whitespace(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Loose title equality
pub fn names_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b) || without_whitespace(a) == without_whitespace(b)
}

/// Strip release-name noise for a second resolution attempt
///
/// Bracketed groups (`[Group]`, `{tag}`) are removed and `_` / `.`
/// separators become spaces.
pub fn clean_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut closing: Option<char> = None;

    for c in name.chars() {
        match (closing, c) {
            (Some(close), c) if c == close => closing = None,
            (Some(_), _) => {}
            (None, '[') => closing = Some(']'),
            (None, '{') => closing = Some('}'),
            (None, '_') | (None, '.') => cleaned.push(' '),
            (None, c) => cleaned.push(c),
        }
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
