//! Cast and crew extraction, plus the shared people cache.
//!
//! People are cached by name, independently of the series they were found
//! in, so a later lookup by name can return the person's picture and AniDB
//! id without re-reading any series document.

use crate::cache::write_atomic;
use crate::error::Result;
use crate::text::reverse_name_order;
use crate::xml::{XmlCursor, XmlElement, XmlEvent};
use shared::{CachePaths, PersonRecord, PersonType};
use std::path::Path;
use tracing::{debug, warn};

/// Creator credit that names the animation studio
pub const ANIMATION_WORK: &str = "Animation Work";

/// Creator credits that are studios rather than people
const STUDIO_CREDITS: [&str; 2] = [ANIMATION_WORK, "Work"];

/// AniDB creator credit to person type
const CREDIT_TYPES: &[(&str, PersonType)] = &[
    ("Direction", PersonType::Director),
    ("Music", PersonType::Composer),
    ("Chief Animation Direction", PersonType::Director),
    ("Series Composition", PersonType::Writer),
    ("Animation Work", PersonType::Producer),
    ("Original Work", PersonType::Writer),
    ("Character Design", PersonType::Writer),
    ("Work", PersonType::Producer),
    ("Animation Character Design", PersonType::Writer),
    ("Effects Direction", PersonType::Writer),
    ("Original Plan", PersonType::Writer),
    ("Chief Direction", PersonType::Director),
    ("Main Character Design", PersonType::Writer),
    ("Story Composition", PersonType::Writer),
    ("Magical Bushidou Musashi Design", PersonType::Writer),
];

/// Person type for a creator credit
///
/// Known credits go through the table; otherwise the credit itself may name
/// a type ("Director", "lyricist"); anything else is an actor.
pub fn person_kind(credit: &str) -> PersonType {
    let credit = credit.trim();
    CREDIT_TYPES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(credit))
        .map(|(_, kind)| *kind)
        .or_else(|| credit.parse().ok())
        .unwrap_or(PersonType::Actor)
}

pub fn is_studio_credit(credit: &str) -> bool {
    STUDIO_CREDITS.contains(&credit.trim())
}

/// Absolute picture URL for a file name attribute
pub fn picture_url(image_base: &str, file: Option<&str>) -> Option<String> {
    let file = file.map(str::trim).filter(|f| !f.is_empty())?;
    Some(format!("{}{}", image_base, file))
}

/// A `<creators><name>` credit
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Credit {
    pub credit: Option<String>,
    pub name: String,
    pub anidb_id: Option<u32>,
    pub picture: Option<String>,
}

impl Credit {
    pub fn to_person(&self, image_base: &str) -> PersonRecord {
        PersonRecord {
            name: reverse_name_order(&self.name),
            kind: person_kind(self.credit.as_deref().unwrap_or_default()),
            role: None,
            image_url: picture_url(image_base, self.picture.as_deref()),
            anidb_id: self.anidb_id,
        }
    }
}

/// A `<characters><character>` entry and its voice actor
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Character {
    pub name: Option<String>,
    pub seiyuu: Option<String>,
    pub seiyuu_id: Option<u32>,
    pub seiyuu_picture: Option<String>,
}

impl Character {
    /// Voice actor as an [`PersonType::Actor`] playing this character
    pub fn to_person(&self, image_base: &str) -> Option<PersonRecord> {
        let seiyuu = self.seiyuu.as_deref().filter(|s| !s.trim().is_empty())?;

        Some(PersonRecord {
            name: reverse_name_order(seiyuu),
            kind: PersonType::Actor,
            role: self.name.clone().filter(|n| !n.is_empty()),
            image_url: picture_url(image_base, self.seiyuu_picture.as_deref()),
            anidb_id: self.seiyuu_id,
        })
    }
}

/// Read the `<creators>` section the cursor just entered
pub(crate) fn read_creators(cursor: &mut XmlCursor<'_>) -> Result<Vec<Credit>> {
    let depth = cursor.depth();
    let mut credits = Vec::new();

    while let Some(event) = cursor.next_in(depth)? {
        if let XmlEvent::Start(element) = event {
            if element.is("name") {
                let name = cursor.read_text()?;
                if name.trim().is_empty() {
                    continue;
                }
                credits.push(Credit {
                    credit: element.attr("type").map(str::to_string),
                    name,
                    anidb_id: element.attr_parsed("id"),
                    picture: element.attr("picture").map(str::to_string),
                });
            } else {
                cursor.skip_element()?;
            }
        }
    }

    Ok(credits)
}

/// Read the `<characters>` section the cursor just entered
pub(crate) fn read_characters(cursor: &mut XmlCursor<'_>) -> Result<Vec<Character>> {
    let depth = cursor.depth();
    let mut characters = Vec::new();

    while let Some(event) = cursor.next_in(depth)? {
        if let XmlEvent::Start(element) = event {
            if element.is("character") {
                characters.push(read_character(cursor)?);
            } else {
                cursor.skip_element()?;
            }
        }
    }

    Ok(characters)
}

fn read_character(cursor: &mut XmlCursor<'_>) -> Result<Character> {
    let depth = cursor.depth();
    let mut character = Character::default();

    while let Some(event) = cursor.next_in(depth)? {
        let XmlEvent::Start(element) = event else {
            continue;
        };

        if element.is("name") {
            character.name = Some(cursor.read_text()?);
        } else if element.is("seiyuu") {
            read_seiyuu(cursor, &element, &mut character)?;
        } else {
            cursor.skip_element()?;
        }
    }

    Ok(character)
}

fn read_seiyuu(cursor: &mut XmlCursor<'_>, element: &XmlElement, character: &mut Character) -> Result<()> {
    character.seiyuu = Some(cursor.read_text()?);
    character.seiyuu_id = element.attr_parsed("id");
    character.seiyuu_picture = element.attr("picture").map(str::to_string);
    Ok(())
}

/// Every person worth caching from a series document
///
/// Voice actors come with their character as role; creators are included
/// except the animation studio credit. A malformed document yields whatever
/// was read before the error.
pub fn extract_people(document: &str, image_base: &str) -> Vec<PersonRecord> {
    let mut people = Vec::new();

    if let Err(e) = collect_people(document, image_base, &mut people) {
        warn!(error = %e, found = people.len(), "Malformed document while extracting people");
    }

    people
}

fn collect_people(document: &str, image_base: &str, people: &mut Vec<PersonRecord>) -> Result<()> {
    let mut cursor = XmlCursor::new(document);
    if cursor.root()?.is_none() {
        return Ok(());
    }

    let depth = cursor.depth();
    while let Some(event) = cursor.next_in(depth)? {
        let XmlEvent::Start(element) = event else {
            continue;
        };

        if element.is("characters") {
            for character in read_characters(&mut cursor)? {
                people.extend(character.to_person(image_base));
            }
        } else if element.is("creators") {
            for credit in read_creators(&mut cursor)? {
                if credit.credit.as_deref() != Some(ANIMATION_WORK) {
                    people.push(credit.to_person(image_base));
                }
            }
        } else {
            cursor.skip_element()?;
        }
    }

    Ok(())
}

/// Person documents under `anidb-people/`
#[derive(Debug, Clone)]
pub struct PersonCache {
    paths: CachePaths,
}

impl PersonCache {
    pub fn new(paths: CachePaths) -> Self {
        Self { paths }
    }

    /// Stored record for a name, if any
    pub async fn lookup(&self, name: &str) -> Option<PersonRecord> {
        let path = self.paths.person_file(name)?;

        match read_person(&path).await {
            Ok(person) => person,
            Err(e) => {
                warn!(name = name, path = %path.display(), error = %e, "Failed to read cached person");
                None
            }
        }
    }

    /// Write one person
    ///
    /// An existing document is only replaced when it has no image and the
    /// new record does. Returns whether anything was written.
    pub async fn store(&self, person: &PersonRecord) -> Result<bool> {
        let Some(path) = self.paths.person_file(&person.name) else {
            return Ok(false);
        };

        if tokio::fs::try_exists(&path).await? {
            let stored = read_person(&path).await.ok().flatten();
            let enriches = person.image_url.is_some()
                && stored.map_or(true, |stored| stored.image_url.is_none());
            if !enriches {
                return Ok(false);
            }
        }

        // Scans of different series may store the same person at once
        let document = quick_xml::se::to_string_with_root("person", person)?;
        write_atomic(&path, &document).await?;

        debug!(name = %person.name, path = %path.display(), "Person cached");
        Ok(true)
    }

    /// Write every person, logging and skipping failures
    pub async fn store_all(&self, people: &[PersonRecord]) -> usize {
        let mut written = 0;

        for person in people {
            match self.store(person).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(name = %person.name, error = %e, "Failed to cache person");
                }
            }
        }

        written
    }
}

async fn read_person(path: &Path) -> Result<Option<PersonRecord>> {
    let document = match tokio::fs::read_to_string(path).await {
        Ok(document) => document,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(quick_xml::de::from_str(&document)?))
}
