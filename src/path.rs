//! Root-relative field paths.
//!
//! A path is the only key into metadata and the target of every operation,
//! so it must render identically on every replica. Paths are typed segment
//! lists; the textual form is
//!
//! ```text
//! $              the document root
//! $.field        an object field
//! $.field[3]     a sequence element
//! $.field.['k']  a map entry (quotes and backslashes escaped with '\')
//! ```
//!
//! `Display` and `FromStr` round-trip exactly.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Map;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// One step of a path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
    Key(String),
}

/// A root-relative path into a document.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The root path `$`.
    pub fn root() -> FieldPath {
        return FieldPath { segments: Vec::new() };
    }

    pub fn from_segments(segments: Vec<Segment>) -> FieldPath {
        return FieldPath { segments };
    }

    pub fn segments(&self) -> &[Segment] {
        return &self.segments;
    }

    pub fn is_root(&self) -> bool {
        return self.segments.is_empty();
    }

    /// Extend with an object field.
    pub fn field(&self, name: impl Into<String>) -> FieldPath {
        return self.with(Segment::Field(name.into()));
    }

    /// Extend with a sequence index.
    pub fn index(&self, index: usize) -> FieldPath {
        return self.with(Segment::Index(index));
    }

    /// Extend with a map key.
    pub fn key(&self, key: impl Into<String>) -> FieldPath {
        return self.with(Segment::Key(key.into()));
    }

    fn with(&self, segment: Segment) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        return FieldPath { segments };
    }

    /// The path without its last segment. The root has no parent.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.is_empty() {
            return None;
        }
        return Some(FieldPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        });
    }

    pub fn last(&self) -> Option<&Segment> {
        return self.segments.last();
    }

    /// A sibling field: same parent, different last field name.
    pub fn sibling(&self, name: &str) -> Option<FieldPath> {
        return self.parent().map(|p| p.field(name));
    }

    /// Follow the path through a value tree.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Field(name), Value::Object(map)) => map.get(name)?,
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        return Some(current);
    }

    /// Follow the path mutably.
    pub fn resolve_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Field(name), Value::Object(map)) => map.get_mut(name)?,
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (Segment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        return Some(current);
    }

    /// Resolve the slot this path names, creating it when missing.
    ///
    /// Named segments create their entry, and a non-object on the way to a
    /// named segment is replaced by an empty object. Indices are never
    /// created: returns `None` when an index is out of range or its parent
    /// is not an array.
    pub fn slot_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Field(name) | Segment::Key(name) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    let Value::Object(map) = current else {
                        return None;
                    };
                    map.entry(name.clone()).or_insert(Value::Null)
                }
                Segment::Index(i) => match current {
                    Value::Array(items) => items.get_mut(*i)?,
                    _ => return None,
                },
            };
        }
        return Some(current);
    }
}

fn escape_key(key: &str, out: &mut String) {
    for c in key.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("$");
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Segment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
                Segment::Key(key) => {
                    out.push_str(".['");
                    escape_key(key, &mut out);
                    out.push_str("']");
                }
            }
        }
        return f.write_str(&out);
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "FieldPath({})", self);
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<FieldPath> {
        let invalid = |reason: &'static str| Error::InvalidPath {
            path: s.to_string(),
            reason,
        };

        let mut chars = s.chars().peekable();
        if chars.next() != Some('$') {
            return Err(invalid("must start with '$'"));
        }

        let mut segments = Vec::new();
        while let Some(c) = chars.next() {
            match c {
                '.' if chars.peek() == Some(&'[') => {
                    chars.next();
                    if chars.next() != Some('\'') {
                        return Err(invalid("map key must be quoted"));
                    }
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('\\') => match chars.next() {
                                Some(escaped) => key.push(escaped),
                                None => return Err(invalid("dangling escape")),
                            },
                            Some('\'') => break,
                            Some(other) => key.push(other),
                            None => return Err(invalid("unterminated map key")),
                        }
                    }
                    if chars.next() != Some(']') {
                        return Err(invalid("expected ']' after map key"));
                    }
                    segments.push(Segment::Key(key));
                }
                '.' => {
                    let mut name = String::new();
                    while let Some(next) = chars.peek() {
                        if *next == '.' || *next == '[' {
                            break;
                        }
                        name.push(*next);
                        chars.next();
                    }
                    if name.is_empty() {
                        return Err(invalid("empty field name"));
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            _ => return Err(invalid("malformed index")),
                        }
                    }
                    let index = digits.parse::<usize>().map_err(|_| invalid("malformed index"))?;
                    segments.push(Segment::Index(index));
                }
                _ => return Err(invalid("unexpected character")),
            }
        }
        return Ok(FieldPath { segments });
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        return serializer.collect_str(self);
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<FieldPath, D::Error> {
        let text = String::deserialize(deserializer)?;
        return text.parse().map_err(serde::de::Error::custom);
    }
}
