//! Cache key templates and per-view key resolution.
//!
//! A template such as `user:{id}` is parsed once into literal and field
//! segments. Interpolated values are form-urlencoded, so distinct field
//! combinations never render to the same key. The one deliberate overlap is a
//! value and the text of its key segment (`7` and `"7"`). Null fields do not
//! render at all.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use url::form_urlencoded::byte_serialize;

use crate::domain::types::FieldMap;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("key template is empty")]
    Empty,
    #[error("unclosed placeholder starting at byte {position}")]
    Unclosed { position: usize },
    #[error("unexpected `}}` at byte {position}")]
    UnexpectedClose { position: usize },
    #[error("empty placeholder at byte {position}")]
    EmptyPlaceholder { position: usize },
    #[error("placeholders `{{{first}}}` and `{{{second}}}` need a separator between them")]
    AdjacentPlaceholders { first: String, second: String },
    #[error("separator `{literal}` can appear inside an encoded value")]
    AmbiguousSeparator { literal: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed `{field}` key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Characters `byte_serialize` can emit for an interpolated value.
fn is_encoded_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '-' | '.' | '_' | '+' | '%')
}

impl KeyTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        if source.is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed { position });
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder { position });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => return Err(TemplateError::UnexpectedClose { position }),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        check_separators(&segments)?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Field names referenced by the template, in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render against `fields`; `None` if any referenced field is missing or null.
    pub fn render(&self, fields: &FieldMap) -> Option<String> {
        let mut key = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Field(name) => {
                    let value = fields.get(name)?.key_segment()?;
                    key.extend(byte_serialize(value.as_bytes()));
                }
            }
        }
        Some(key)
    }
}

fn check_separators(segments: &[Segment]) -> Result<(), TemplateError> {
    for window in segments.windows(3) {
        if let [Segment::Field(_), Segment::Literal(text), Segment::Field(_)] = window
            && text.chars().all(is_encoded_value_char)
        {
            return Err(TemplateError::AmbiguousSeparator {
                literal: text.clone(),
            });
        }
    }
    for window in segments.windows(2) {
        if let [Segment::Field(first), Segment::Field(second)] = window {
            return Err(TemplateError::AdjacentPlaceholders {
                first: first.clone(),
                second: second.clone(),
            });
        }
    }
    Ok(())
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolves the cache key of each declared view of one entity type.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyResolver {
    primary: Option<KeyTemplate>,
    views: BTreeMap<String, KeyTemplate>,
}

impl CacheKeyResolver {
    /// A resolver that never produces keys; caching is off for the entity type.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(primary: KeyTemplate, views: BTreeMap<String, KeyTemplate>) -> Self {
        Self {
            primary: Some(primary),
            views,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.primary.is_some()
    }

    /// Resolve the key of `view` (`None` is the default view).
    pub fn resolve(&self, view: Option<&str>, fields: &FieldMap) -> Option<String> {
        let primary = self.primary.as_ref()?;
        let template = match view {
            None => primary,
            Some(name) => self.views.get(name)?,
        };
        template.render(fields)
    }

    /// Every declared view: the default one first, then the named ones.
    pub fn views(&self) -> Vec<Option<&str>> {
        if self.primary.is_none() {
            return Vec::new();
        }
        std::iter::once(None)
            .chain(self.views.keys().map(|name| Some(name.as_str())))
            .collect()
    }
}
