//! Wildcard resource patterns.
//!
//! Grammar: segments separated by `.`; `*` matches exactly one segment;
//! `**` (or a trailing bare `*`) matches the remainder, including an
//! empty remainder. Invalid patterns are rejected when a grant is created,
//! never at evaluation time.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    AnyOne,
    Rest,
}

/// A validated, pre-parsed resource pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ResourcePattern {
    /// Parse and validate a pattern string.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::Validation("resource pattern is empty".into()));
        }
        let parts: Vec<&str> = raw.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => {
                    return Err(Error::Validation(format!(
                        "resource pattern '{raw}' has an empty segment"
                    )))
                }
                "**" => {
                    if i != last {
                        return Err(Error::Validation(format!(
                            "resource pattern '{raw}': '**' must be the final segment"
                        )));
                    }
                    Segment::Rest
                }
                // A trailing bare '*' also matches the remainder.
                "*" if i == last => Segment::Rest,
                "*" => Segment::AnyOne,
                literal => {
                    if !literal
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                    {
                        return Err(Error::Validation(format!(
                            "resource pattern '{raw}': invalid segment '{literal}'"
                        )));
                    }
                    Segment::Literal(literal.to_string())
                }
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Test the pattern against a concrete resource name.
    pub fn matches(&self, name: &str) -> bool {
        let name_segments: Vec<&str> = if name.is_empty() {
            Vec::new()
        } else {
            name.split('.').collect()
        };

        let mut i = 0;
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::AnyOne => {
                    if i >= name_segments.len() {
                        return false;
                    }
                    i += 1;
                }
                Segment::Literal(lit) => {
                    if name_segments.get(i) != Some(&lit.as_str()) {
                        return false;
                    }
                    i += 1;
                }
            }
        }
        i == name_segments.len()
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<ResourcePattern> for String {
    fn from(p: ResourcePattern) -> String {
        p.raw
    }
}

impl std::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
