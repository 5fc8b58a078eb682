//! Forward-only XML cursor over quick-xml.
//!
//! AniDB documents are large and not always well formed, so nothing here
//! builds a tree. The cursor hands out start/end/text events one at a time,
//! tracks nesting depth, and offers the few helpers the parsers need: read an
//! element's text, skip a subtree, and slice an element verbatim out of the
//! source.

use crate::error::Result;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::str::FromStr;

/// A single pull event
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    Start(XmlElement),
    End(String),
    Text(String),
}

/// Element start tag with its attributes
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    /// Byte offset of the `<` opening this element
    offset: usize,
}

impl XmlElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute parsed into `T`; missing or unparseable gives `None`
    pub fn attr_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.attr(key).and_then(|v| v.trim().parse().ok())
    }
}

/// Pull cursor over an in-memory document
///
/// Finite and not restartable: once the end of input (or a syntax error) is
/// reached it yields nothing more.
pub struct XmlCursor<'a> {
    reader: Reader<&'a [u8]>,
    source: &'a str,
    depth: usize,
    finished: bool,
}

impl<'a> XmlCursor<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut reader = Reader::from_str(source);
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
        config.expand_empty_elements = true;

        Self {
            reader,
            source,
            depth: 0,
            finished: false,
        }
    }

    /// Number of currently open elements
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn byte_offset(&self) -> usize {
        (self.reader.buffer_position() as usize).min(self.source.len())
    }

    /// Next event, skipping declarations, comments and processing instructions
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    self.finished = true;
                    return Err(e.into());
                }
            };

            match event {
                Event::Start(start) => {
                    self.depth += 1;
                    let offset = self.source[..self.byte_offset()].rfind('<').unwrap_or(0);
                    return Ok(Some(XmlEvent::Start(element(&start, offset))));
                }
                Event::End(end) => {
                    self.depth = self.depth.saturating_sub(1);
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    return Ok(Some(XmlEvent::End(name)));
                }
                Event::Text(text) => {
                    let text = unescape_lossy(&text);
                    if !text.is_empty() {
                        return Ok(Some(XmlEvent::Text(text)));
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    return Ok(Some(XmlEvent::Text(text)));
                }
                Event::Eof => {
                    self.finished = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Next event inside the element opened at `depth`
    ///
    /// Returns `None` once that element's end tag has been consumed, so a
    /// section parser can loop over its descendants without knowing where the
    /// section ends.
    pub fn next_in(&mut self, depth: usize) -> Result<Option<XmlEvent>> {
        if self.depth < depth {
            return Ok(None);
        }

        match self.next_event()? {
            Some(XmlEvent::End(_)) if self.depth < depth => Ok(None),
            other => Ok(other),
        }
    }

    /// Concatenated text of the element just started, consuming its end tag
    pub fn read_text(&mut self) -> Result<String> {
        let depth = self.depth;
        let mut text = String::new();

        while let Some(event) = self.next_in(depth)? {
            if let XmlEvent::Text(chunk) = event {
                text.push_str(&chunk);
            }
        }

        Ok(text)
    }

    /// Skip the rest of the element just started
    pub fn skip_element(&mut self) -> Result<()> {
        let depth = self.depth;
        while self.next_in(depth)?.is_some() {}
        Ok(())
    }

    /// Verbatim source of the element just started, consuming it
    pub fn read_outer(&mut self, start: &XmlElement) -> Result<&'a str> {
        self.skip_element()?;
        let end = self.byte_offset().max(start.offset);
        Ok(&self.source[start.offset..end])
    }

    /// Advance to the document's root element
    pub fn root(&mut self) -> Result<Option<XmlElement>> {
        while let Some(event) = self.next_event()? {
            if let XmlEvent::Start(element) = event {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }
}

fn element(start: &BytesStart<'_>, offset: usize) -> XmlElement {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .with_checks(false)
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = match attr.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            (key, value)
        })
        .collect();

    XmlElement {
        name,
        attributes,
        offset,
    }
}

/// Unescape text, keeping the raw bytes when an entity is unknown
fn unescape_lossy(text: &BytesText<'_>) -> String {
    match text.unescape() {
        Ok(Cow::Borrowed(s)) => s.to_string(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => String::from_utf8_lossy(text).into_owned(),
    }
}
