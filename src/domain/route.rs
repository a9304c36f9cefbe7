//! Path-pattern grammar for rule matching.
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a
//! literal, which must match the request segment exactly, or a named
//! parameter (`:name`), which matches any single non-empty segment.
//!
//! ```
//! use route_guard::PathPattern;
//!
//! let pattern = PathPattern::parse("/api/v1/contacts/:id").unwrap();
//! assert!(pattern.matches("/api/v1/contacts/42"));
//! assert!(!pattern.matches("/api/v1/contacts/42/notes"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Marker that introduces a parameter segment.
pub const PARAM_MARKER: char = ':';

/// Error returned when a path pattern cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Patterns must be absolute
    #[error("path pattern `{0}` must start with '/'")]
    NotAbsolute(String),
    /// A `:` segment without a name
    #[error("path pattern `{pattern}` has an unnamed parameter at segment {index}")]
    EmptyParameter {
        /// The offending pattern
        pattern: String,
        /// Zero-based segment index
        index: usize,
    },
}

/// One segment of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the request segment byte for byte
    Literal(String),
    /// Matches any single non-empty request segment
    Param(String),
}

impl Segment {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == candidate,
            Segment::Param(_) => !candidate.is_empty(),
        }
    }
}

/// A parsed route pattern such as `/api/v1/contacts/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    /// Returns `PatternError` if the pattern is not absolute or contains a
    /// parameter marker without a name.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(PatternError::NotAbsolute(pattern.to_string()));
        };

        let mut segments = Vec::new();
        for (index, part) in rest.split('/').enumerate() {
            match part.strip_prefix(PARAM_MARKER) {
                Some("") => {
                    return Err(PatternError::EmptyParameter {
                        pattern: pattern.to_string(),
                        index,
                    })
                }
                Some(name) => segments.push(Segment::Param(name.to_string())),
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the pattern contains no parameter segments.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Check a request path against this pattern.
    ///
    /// Any query string is ignored. Segment counts must be equal.
    pub fn matches(&self, path: &str) -> bool {
        let Some(parts) = request_segments(path) else {
            return false;
        };

        let mut count = 0;
        for part in parts {
            match self.segments.get(count) {
                Some(segment) if segment.matches(part) => count += 1,
                _ => return false,
            }
        }
        count == self.segments.len()
    }

    /// Extract named parameters if `path` matches.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        if !self.matches(path) {
            return None;
        }
        let parts = request_segments(path)?;
        let params = self
            .segments
            .iter()
            .zip(parts)
            .filter_map(|(segment, value)| match segment {
                Segment::Param(name) => Some((name.clone(), value.to_string())),
                Segment::Literal(_) => None,
            })
            .collect();
        Some(params)
    }
}

fn request_segments(path: &str) -> Option<std::str::Split<'_, char>> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.strip_prefix('/').map(|rest| rest.split('/'))
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.raw
    }
}
