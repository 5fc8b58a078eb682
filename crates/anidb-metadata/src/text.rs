//! Small text transformations shared by the series and episode parsers.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// `http://anidb.net/ch7 [Name]` style links embedded in descriptions
static ANIDB_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://anidb\.net/[\w/?=&.]+ \[(?P<name>[^\]]*)\]").expect("valid link pattern")
});

const DESCRIPTION_CUTOFFS: [&str; 2] = ["Source:", "Note:"];

/// Replace AniDB links with their label
pub fn strip_anidb_links(text: &str) -> String {
    ANIDB_LINK.replace_all(text, "$name").into_owned()
}

/// Convert line feeds to the catalog's HTML line-break convention
pub fn line_feeds_to_breaks(text: &str) -> String {
    text.replace('\n', "<br>\n")
}

/// Clean a series description or episode summary
///
/// Links are reduced to their labels, anything from the first "Source:" or
/// "Note:" on is dropped, and line feeds become `<br>` breaks.
pub fn clean_description(raw: &str) -> String {
    let stripped = strip_anidb_links(raw);

    let cut = DESCRIPTION_CUTOFFS
        .iter()
        .filter_map(|marker| stripped.find(marker))
        .min()
        .unwrap_or(stripped.len());

    line_feeds_to_breaks(stripped[..cut].trim_end())
}

/// AniDB stores names family-name first; reverse the word order
pub fn reverse_name_order(name: &str) -> String {
    name.split(' ')
        .filter(|part| !part.is_empty())
        .rev()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upper-case the first letter of every word, words split on space or hyphen
pub fn title_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut at_word_start = true;

    for c in value.chars() {
        if at_word_start && c.is_lowercase() {
            result.extend(c.to_uppercase());
        } else {
            result.push(c);
        }
        at_word_start = c == ' ' || c == '-';
    }

    result
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY`
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }

    let mut parts = value.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(month) => month.parse().ok()?,
        None => 1,
    };

    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Parse a decimal rating and round it to one decimal place
pub fn parse_rating(value: &str) -> Option<f32> {
    let rating: f32 = value.trim().parse().ok()?;
    if !rating.is_finite() {
        return None;
    }
    Some((rating * 10.0).round() / 10.0)
}
