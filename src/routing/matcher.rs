//! Route pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile `/literal/:param/*` patterns once, at registration
//! - Match a request path segment by segment and capture parameters
//! - Match middleware mount prefixes on `/` boundaries
//!
//! # Design Decisions
//! - Literal segments compare case-sensitively after percent-decoding
//! - `*` is only valid as the final segment and captures under `wild`
//! - No regex, so matching is a single linear walk over the path

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

/// Parameter name under which a trailing wildcard is captured.
pub const WILDCARD_PARAM: &str = "wild";

/// Captured route parameters.
pub type Params = HashMap<String, String>;

/// Error raised when a route or mount prefix is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("pattern `{0}` must start with `/`")]
    MissingLeadingSlash(String),

    #[error("pattern `{pattern}` has an invalid parameter name `{name}`")]
    InvalidParam { pattern: String, name: String },

    #[error("pattern `{pattern}` declares parameter `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("pattern `{0}` uses `*` anywhere but the final segment")]
    MisplacedWildcard(String),

    #[error("pattern `{pattern}` has a malformed segment `{segment}`")]
    InvalidSegment { pattern: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `/items/:id` or `/files/*`.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let source = if pattern.is_empty() { "/" } else { pattern };
        if !source.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash(source.to_string()));
        }

        let raw: Vec<&str> = source.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut names: Vec<&str> = Vec::new();

        for (index, segment) in raw.iter().enumerate() {
            if *segment == "*" {
                if index + 1 != raw.len() {
                    return Err(RouteError::MisplacedWildcard(source.to_string()));
                }
                segments.push(Segment::Wildcard);
            } else if let Some(name) = segment.strip_prefix(':') {
                let valid = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid || name == WILDCARD_PARAM {
                    return Err(RouteError::InvalidParam {
                        pattern: source.to_string(),
                        name: name.to_string(),
                    });
                }
                if names.contains(&name) {
                    return Err(RouteError::DuplicateParam {
                        pattern: source.to_string(),
                        name: name.to_string(),
                    });
                }
                names.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else {
                if segment.contains('*') {
                    return Err(RouteError::MisplacedWildcard(source.to_string()));
                }
                let literal = decode(segment).ok_or_else(|| RouteError::InvalidSegment {
                    pattern: source.to_string(),
                    segment: segment.to_string(),
                })?;
                segments.push(Segment::Literal(literal));
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in declaration order (`wild` for a trailing `*`).
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Wildcard => Some(WILDCARD_PARAM),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Returns true if the path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match the path and return the decoded parameters.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let mut params = Params::new();
        if self.segments.is_empty() {
            return (path == "/").then_some(params);
        }

        let mut rest = path.strip_prefix('/')?;
        let last = self.segments.len() - 1;

        for (index, segment) in self.segments.iter().enumerate() {
            if let Segment::Wildcard = segment {
                params.insert(WILDCARD_PARAM.to_string(), decode(rest)?);
                return Some(params);
            }

            let (head, tail) = match rest.split_once('/') {
                Some((head, tail)) => (head, Some(tail)),
                None => (rest, None),
            };

            match segment {
                Segment::Literal(literal) => {
                    if decode(head)? != *literal {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if head.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode(head)?);
                }
                Segment::Wildcard => unreachable!("handled above"),
            }

            match tail {
                // Trailing content after the final segment.
                Some(_) if index == last => return None,
                Some(tail) => rest = tail,
                // Path ran out before the pattern did.
                None if index != last => return None,
                None => {}
            }
        }

        Some(params)
    }
}

/// Matches middleware mount prefixes on segment boundaries.
#[derive(Debug, Clone)]
pub struct PrefixMatcher {
    prefix: String,
}

impl PrefixMatcher {
    /// Create a prefix matcher. A trailing `/` is ignored, so `/admin/` and
    /// `/admin` mount at the same place.
    pub fn new(prefix: &str) -> Result<Self, RouteError> {
        if prefix.is_empty() || prefix == "/" {
            return Ok(Self { prefix: "/".to_string() });
        }
        if !prefix.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash(prefix.to_string()));
        }
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self { prefix: "/".to_string() });
        }
        Ok(Self {
            prefix: trimmed.to_string(),
        })
    }

    /// The normalized prefix.
    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// True for the catch-all `/` prefix.
    pub fn is_root(&self) -> bool {
        self.prefix == "/"
    }

    /// Returns true if `path` equals the prefix or continues it with `/`.
    pub fn matches(&self, path: &str) -> bool {
        if self.is_root() {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(remainder) => remainder.is_empty() || remainder.starts_with('/'),
            None => false,
        }
    }

    /// Strip the prefix from a URL (path plus optional query). An empty
    /// remainder becomes `/`.
    pub fn strip(&self, url: &str) -> String {
        if self.is_root() {
            return url.to_string();
        }
        match url.strip_prefix(self.prefix.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('?') => format!("/{rest}"),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => url.to_string(),
        }
    }
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
