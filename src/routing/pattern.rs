//! Path pattern matching.
//!
//! # Responsibilities
//! - Parse path templates (`/containers/{*name}/json`) once at startup
//! - Match request paths segment by segment and capture named values
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - No regex: segments are compared directly, greedy captures backtrack
//! - A greedy capture may sit in the middle of a template and always takes
//!   at least one segment

use std::fmt;

/// One segment of a compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Exact text.
    Literal(String),
    /// `{name}`: exactly one non-empty segment.
    Param(String),
    /// `{*name}`: one or more segments, joined back with `/`.
    Greedy(String),
    /// API version prefix: `v` followed by digits and dots (`v1.24`).
    Version,
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

/// Template could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path pattern {pattern:?}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

impl PathPattern {
    /// Parse a template such as `/images/{*name}/push`.
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let err = |reason| PatternError {
            pattern: template.to_string(),
            reason,
        };

        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| err("must start with '/'"))?;

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(err("empty segment"));
            }
            let segment = match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(inner) => match inner.strip_prefix('*') {
                    Some("") => return Err(err("unnamed greedy capture")),
                    Some(name) => Segment::Greedy(name.to_string()),
                    None if inner.is_empty() => return Err(err("unnamed capture")),
                    None => Segment::Param(inner.to_string()),
                },
                None if raw.contains('{') || raw.contains('}') => {
                    return Err(err("braces inside a literal segment"))
                }
                None => Segment::Literal(raw.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// The same pattern under the `/v{version}` prefix.
    pub fn versioned(&self) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(Segment::Version);
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// Match a request path, returning captured values in template order.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        let mut captures = Vec::new();
        if match_from(&self.segments, &parts, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }
}

fn match_from(segments: &[Segment], parts: &[&str], captures: &mut Vec<(String, String)>) -> bool {
    let Some((segment, remaining)) = segments.split_first() else {
        return parts.is_empty();
    };
    let Some((part, rest)) = parts.split_first() else {
        return false;
    };

    match segment {
        Segment::Literal(text) => text == part && match_from(remaining, rest, captures),
        Segment::Version => is_version(part) && match_from(remaining, rest, captures),
        Segment::Param(name) => {
            if part.is_empty() {
                return false;
            }
            captures.push((name.clone(), part.to_string()));
            if match_from(remaining, rest, captures) {
                return true;
            }
            captures.pop();
            false
        }
        Segment::Greedy(name) => {
            // Longest capture first, shrinking until the tail matches.
            // Every remaining template segment needs one path segment.
            let max_take = parts.len().saturating_sub(remaining.len());
            for take in (1..=max_take).rev() {
                let taken = &parts[..take];
                if taken.iter().all(|p| p.is_empty()) {
                    continue;
                }
                let mark = captures.len();
                captures.push((name.clone(), taken.join("/")));
                if match_from(remaining, &parts[take..], captures) {
                    return true;
                }
                captures.truncate(mark);
            }
            false
        }
    }
}

fn is_version(part: &str) -> bool {
    match part.strip_prefix('v') {
        Some(rest) => {
            rest.chars().any(|c| c.is_ascii_digit())
                && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
        }
        None => false,
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "/{}", text)?,
                Segment::Param(name) => write!(f, "/{{{}}}", name)?,
                Segment::Greedy(name) => write!(f, "/{{*{}}}", name)?,
                Segment::Version => write!(f, "/v{{version}}")?,
            }
        }
        Ok(())
    }
}
