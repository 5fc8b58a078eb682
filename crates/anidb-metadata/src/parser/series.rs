//! Series document reader.
//!
//! Walks the children of `<anime>` once. Every section is optional and may
//! appear in any order; unknown sections are skipped. A structural error
//! stops the walk but keeps everything read up to that point.

use super::ParseOptions;
use crate::error::Result;
use crate::genres::WeightedTag;
use crate::people::{is_studio_credit, read_characters, read_creators};
use crate::text::{clean_description, parse_date, parse_rating};
use crate::titles::{localize, Title, TitleType};
use crate::xml::{XmlCursor, XmlElement, XmlEvent};
use chrono::Datelike;
use shared::{SeriesRecord, SeriesStatus};
use tracing::{debug, warn};

/// Accumulates one series while the cursor walks the document
struct SeriesReader<'o> {
    options: &'o ParseOptions,
    series: SeriesRecord,
    titles: Vec<Title>,
    tags: Vec<WeightedTag>,
}

impl<'o> SeriesReader<'o> {
    fn new(anidb_id: u32, options: &'o ParseOptions) -> Self {
        Self {
            options,
            series: SeriesRecord::new(anidb_id),
            titles: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn read(&mut self, cursor: &mut XmlCursor<'_>) -> Result<()> {
        if cursor.root()?.is_none() {
            return Ok(());
        }

        let depth = cursor.depth();
        while let Some(event) = cursor.next_in(depth)? {
            if let XmlEvent::Start(element) = event {
                self.read_section(cursor, &element)?;
            }
        }

        Ok(())
    }

    fn read_section(&mut self, cursor: &mut XmlCursor<'_>, element: &XmlElement) -> Result<()> {
        match element.name() {
            "startdate" => {
                if let Some(date) = parse_date(&cursor.read_text()?) {
                    self.series.premiere_date = Some(date);
                    self.series.production_year = Some(date.year());
                }
            }
            "enddate" => {
                self.series.end_date = parse_date(&cursor.read_text()?);
            }
            "titles" => self.read_titles(cursor)?,
            "creators" => {
                for credit in read_creators(cursor)? {
                    if credit.credit.as_deref().is_some_and(is_studio_credit) {
                        self.series.studios.push(credit.name.trim().to_string());
                    } else {
                        self.series
                            .people
                            .push(credit.to_person(&self.options.image_base_url));
                    }
                }
            }
            "description" => {
                let overview = clean_description(&cursor.read_text()?);
                if !overview.is_empty() {
                    self.series.overview = Some(overview);
                }
            }
            "ratings" => self.read_ratings(cursor)?,
            "resources" => self.read_resources(cursor)?,
            "characters" => {
                for character in read_characters(cursor)? {
                    if character.name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
                        self.series
                            .people
                            .extend(character.to_person(&self.options.image_base_url));
                    }
                }
            }
            "tags" => self.read_tags(cursor)?,
            "picture" => {
                let file = cursor.read_text()?;
                self.series.image_url =
                    crate::people::picture_url(&self.options.image_base_url, Some(&file));
            }
            "episodecount" => {
                self.series.episode_count = cursor.read_text()?.trim().parse().ok();
            }
            _ => cursor.skip_element()?,
        }

        Ok(())
    }

    fn read_titles(&mut self, cursor: &mut XmlCursor<'_>) -> Result<()> {
        let depth = cursor.depth();

        while let Some(event) = cursor.next_in(depth)? {
            if let XmlEvent::Start(element) = event {
                if element.is("title") {
                    let name = cursor.read_text()?;
                    self.titles.push(Title::new(
                        element.attr("xml:lang"),
                        TitleType::parse(element.attr("type")),
                        name,
                    ));
                } else {
                    cursor.skip_element()?;
                }
            }
        }

        Ok(())
    }

    fn read_ratings(&mut self, cursor: &mut XmlCursor<'_>) -> Result<()> {
        let depth = cursor.depth();

        while let Some(event) = cursor.next_in(depth)? {
            if let XmlEvent::Start(element) = event {
                if element.is("permanent") {
                    if let Some(rating) = parse_rating(&cursor.read_text()?) {
                        self.series.community_rating = Some(rating);
                    }
                } else {
                    cursor.skip_element()?;
                }
            }
        }

        Ok(())
    }

    /// Type 2 resources are MyAnimeList entries; the lowest id wins
    fn read_resources(&mut self, cursor: &mut XmlCursor<'_>) -> Result<()> {
        let depth = cursor.depth();

        while let Some(event) = cursor.next_in(depth)? {
            let XmlEvent::Start(element) = event else {
                continue;
            };

            if !element.is("resource") || element.attr("type") != Some("2") {
                cursor.skip_element()?;
                continue;
            }

            let resource_depth = cursor.depth();
            let mut ids: Vec<u32> = Vec::new();
            while let Some(event) = cursor.next_in(resource_depth)? {
                if let XmlEvent::Start(inner) = event {
                    if inner.is("identifier") {
                        if let Ok(id) = cursor.read_text()?.trim().parse() {
                            ids.push(id);
                        }
                    }
                }
            }

            if let Some(id) = ids.into_iter().min() {
                self.series.external_ids.myanimelist = Some(id);
            }
        }

        Ok(())
    }

    fn read_tags(&mut self, cursor: &mut XmlCursor<'_>) -> Result<()> {
        let depth = cursor.depth();

        while let Some(event) = cursor.next_in(depth)? {
            let XmlEvent::Start(element) = event else {
                continue;
            };

            if !element.is("tag") {
                cursor.skip_element()?;
                continue;
            }

            let Some(weight) = element.attr_parsed::<i32>("weight") else {
                cursor.skip_element()?;
                continue;
            };

            let tag_depth = cursor.depth();
            let mut name = None;
            while let Some(event) = cursor.next_in(tag_depth)? {
                if let XmlEvent::Start(inner) = event {
                    if inner.is("name") {
                        name = Some(cursor.read_text()?);
                    } else {
                        cursor.skip_element()?;
                    }
                }
            }

            if let Some(name) = name {
                self.tags.push(WeightedTag {
                    name,
                    weight,
                    id: element.attr_parsed("id"),
                    parent_id: element.attr_parsed("parentid"),
                });
            }
        }

        Ok(())
    }

    fn finish(mut self) -> SeriesRecord {
        let options = self.options;

        self.series.name = localize(&self.titles, &options.languages, options.title_language)
            .map(|title| title.name.clone());
        self.series.genres = options.genres.from_tags(&self.tags);
        self.series.status = match self.series.end_date {
            Some(end) if end <= options.today => SeriesStatus::Ended,
            _ => SeriesStatus::Continuing,
        };

        self.series
    }
}

/// Parse a series document into a record
pub fn parse_series(document: &str, anidb_id: u32, options: &ParseOptions) -> SeriesRecord {
    let mut cursor = XmlCursor::new(document);
    let mut reader = SeriesReader::new(anidb_id, options);

    if let Err(e) = reader.read(&mut cursor) {
        warn!(anidb_id = anidb_id, error = %e, "Malformed series document, keeping partial record");
    }

    let series = reader.finish();
    debug!(
        anidb_id = anidb_id,
        name = ?series.name,
        genres = series.genres.len(),
        people = series.people.len(),
        "Parsed series document"
    );
    series
}

/// Series picture without reading the rest of the document
pub fn find_image_url(document: &str, image_base_url: &str) -> Result<Option<String>> {
    let mut cursor = XmlCursor::new(document);
    if cursor.root()?.is_none() {
        return Ok(None);
    }

    let depth = cursor.depth();
    while let Some(event) = cursor.next_in(depth)? {
        if let XmlEvent::Start(element) = event {
            if element.is("picture") {
                let file = cursor.read_text()?;
                return Ok(crate::people::picture_url(image_base_url, Some(&file)));
            }
            cursor.skip_element()?;
        }
    }

    Ok(None)
}
