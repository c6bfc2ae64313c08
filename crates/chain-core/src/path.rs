//! Path pattern parsing, priority, and matching (component A of the design).
//!
//! A [`PathInfo`] is the normalized, immutable representation of a
//! registered route or middleware path: an ordered list of segments, each
//! either a literal, a `:name` parameter, or a trailing `*name` wildcard.

use crate::error::{ChainError, ChainResult};

/// One token of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    Literal,
    Param,
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Literal text, parameter name, or wildcard name (never includes the
    /// leading `:`/`*`).
    pub text: String,
}

/// Weight assigned to each segment kind when computing [`PathInfo::priority`].
const WEIGHT_LITERAL: u64 = 3;
const WEIGHT_PARAM: u64 = 2;
const WEIGHT_WILDCARD: u64 = 1;

/// Parsed, immutable representation of a route or middleware path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub original: String,
    pub segments: Vec<Segment>,
    pub has_static: bool,
    pub has_parameter: bool,
    pub has_wildcard: bool,
    pub priority: u64,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Byte `(start, end)` offsets (end-exclusive) of each non-empty segment,
/// used to recover the exact remainder text (including leading `/`) that a
/// trailing wildcard captures.
fn segment_offsets(path: &str) -> Vec<(usize, usize)> {
    let bytes = path.as_bytes();
    let mut offsets = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i] != b'/' {
            i += 1;
        }
        offsets.push((start, i));
    }
    offsets
}

impl PathInfo {
    /// Parse a registered path/pattern string into a [`PathInfo`].
    ///
    /// Fails if a `:` segment has an empty name, a segment carries more than
    /// one `*`, or a wildcard segment is not the last one.
    pub fn parse(path: &str) -> ChainResult<Self> {
        let raw_segments = split_segments(path);
        let n = raw_segments.len();
        let mut segments = Vec::with_capacity(n);
        let mut has_static = false;
        let mut has_parameter = false;
        let mut has_wildcard = false;

        for (i, raw) in raw_segments.iter().enumerate() {
            if raw.matches('*').count() > 1 {
                return Err(ChainError::MultipleWildcardsInSegment);
            }
            if let Some(rest) = raw.strip_prefix(':') {
                if rest.is_empty() {
                    return Err(ChainError::EmptyParamName(path.to_string()));
                }
                has_parameter = true;
                segments.push(Segment {
                    kind: SegmentKind::Param,
                    text: rest.to_string(),
                });
            } else if let Some(rest) = raw.strip_prefix('*') {
                if i != n - 1 {
                    return Err(ChainError::WildcardNotAtEnd);
                }
                has_wildcard = true;
                let name = if rest.is_empty() { "filepath" } else { rest };
                segments.push(Segment {
                    kind: SegmentKind::Wildcard,
                    text: name.to_string(),
                });
            } else {
                has_static = true;
                segments.push(Segment {
                    kind: SegmentKind::Literal,
                    text: (*raw).to_string(),
                });
            }
        }

        let priority = Self::compute_priority(&segments);

        Ok(Self {
            original: path.to_string(),
            segments,
            has_static,
            has_parameter,
            has_wildcard,
            priority,
        })
    }

    fn compute_priority(segments: &[Segment]) -> u64 {
        let n = segments.len() as u64;
        segments
            .iter()
            .enumerate()
            .map(|(i, seg)| {
                let i = i as u64;
                let w = match seg.kind {
                    SegmentKind::Literal => WEIGHT_LITERAL,
                    SegmentKind::Param => WEIGHT_PARAM,
                    SegmentKind::Wildcard => WEIGHT_WILDCARD,
                };
                let pos = n - i;
                pos * pos * w
            })
            .sum()
    }

    /// Segment count of this pattern.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Match this pattern against a concrete request path, returning the
    /// extracted `(name, value)` parameters on success.
    ///
    /// A no-wildcard pattern requires an identical segment count; a
    /// wildcard pattern requires the path to have at least as many segments,
    /// and the wildcard captures everything from its segment onward
    /// (including the leading `/`).
    pub fn matches_path(&self, path: &str) -> Option<Vec<(String, String)>> {
        self.matches_path_ci(path, false)
    }

    /// Same as [`Self::matches_path`] but with case-insensitive literal
    /// comparison, used only to compute fixed-path redirect targets. The
    /// returned parameter list is always empty in that mode.
    pub fn matches_path_ci(&self, path: &str, case_insensitive: bool) -> Option<Vec<(String, String)>> {
        let path_segments = split_segments(path);
        if self.has_wildcard {
            if path_segments.len() < self.segments.len() {
                return None;
            }
        } else if path_segments.len() != self.segments.len() {
            return None;
        }

        let offsets = if self.has_wildcard {
            segment_offsets(path)
        } else {
            Vec::new()
        };

        let mut params = Vec::new();
        for (i, seg) in self.segments.iter().enumerate() {
            match seg.kind {
                SegmentKind::Literal => {
                    let candidate = path_segments[i];
                    let eq = if case_insensitive {
                        candidate.eq_ignore_ascii_case(&seg.text)
                    } else {
                        candidate == seg.text
                    };
                    if !eq {
                        return None;
                    }
                }
                SegmentKind::Param => {
                    let candidate = path_segments[i];
                    if candidate.is_empty() {
                        return None;
                    }
                    if !case_insensitive {
                        params.push((seg.text.clone(), candidate.to_string()));
                    }
                }
                SegmentKind::Wildcard => {
                    if !case_insensitive {
                        let (start, _) = offsets[i];
                        let remainder = &path[start.saturating_sub(1)..];
                        params.push((seg.text.clone(), remainder.to_string()));
                    }
                    return Some(params);
                }
            }
        }
        Some(params)
    }

    /// Reconstruct a concrete path from this pattern given a set of
    /// parameter values, the inverse of [`Self::matches_path`].
    pub fn replace_path(&self, params: &[(String, String)]) -> String {
        let lookup = |name: &str| -> String {
            params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let mut out = String::new();
        for seg in &self.segments {
            match seg.kind {
                SegmentKind::Literal => {
                    out.push('/');
                    out.push_str(&seg.text);
                }
                SegmentKind::Param => {
                    out.push('/');
                    out.push_str(&lookup(&seg.text));
                }
                SegmentKind::Wildcard => {
                    let v = lookup(&seg.text);
                    // the captured value already carries its own leading '/'
                    out.push_str(&v);
                }
            }
        }
        if out.is_empty() {
            "/".to_string()
        } else {
            out
        }
    }

    /// Whether `self` (read as a middleware path) could apply to `route`.
    pub fn maybe_matches(&self, route: &PathInfo) -> bool {
        if self.original == route.original {
            return true;
        }
        if !self.has_wildcard && self.segments.len() > route.segments.len() {
            return false;
        }
        for (i, mseg) in self.segments.iter().enumerate() {
            if mseg.kind == SegmentKind::Wildcard {
                return true;
            }
            let Some(rseg) = route.segments.get(i) else {
                return false;
            };
            let either_is_variable =
                mseg.kind != SegmentKind::Literal || rseg.kind != SegmentKind::Literal;
            if either_is_variable {
                continue;
            }
            if mseg.text != rseg.text {
                return false;
            }
        }
        true
    }

    /// Whether two routes registered on the same method conflict: identical
    /// priority and identical segment-kind/literal-text sequence.
    pub fn conflicts_with(&self, other: &PathInfo) -> bool {
        if self.priority != other.priority {
            return false;
        }
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments.iter().zip(other.segments.iter()).all(|(a, b)| match (&a.kind, &b.kind) {
            (SegmentKind::Literal, SegmentKind::Literal) => a.text == b.text,
            (SegmentKind::Param, SegmentKind::Param) => true,
            (SegmentKind::Wildcard, SegmentKind::Wildcard) => true,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_path() {
        let p = PathInfo::parse("/user/profile").unwrap();
        assert!(p.has_static);
        assert!(!p.has_parameter);
        assert!(!p.has_wildcard);
        assert_eq!(p.segment_count(), 2);
    }

    #[test]
    fn rejects_empty_param_name() {
        assert_eq!(
            PathInfo::parse("/user/:").unwrap_err(),
            ChainError::EmptyParamName("/user/:".to_string())
        );
    }

    #[test]
    fn wildcard_defaults_to_filepath() {
        let p = PathInfo::parse("/src/*").unwrap();
        assert_eq!(p.segments.last().unwrap().text, "filepath");
    }

    #[test]
    fn rejects_non_terminal_wildcard() {
        assert_eq!(
            PathInfo::parse("/src/*rest/more").unwrap_err(),
            ChainError::WildcardNotAtEnd
        );
    }

    #[test]
    fn priority_favors_literals_over_params_and_wildcards() {
        let lit = PathInfo::parse("/user/profile").unwrap();
        let param = PathInfo::parse("/user/:name").unwrap();
        let wild = PathInfo::parse("/user/*rest").unwrap();
        assert!(lit.priority > param.priority);
        assert!(param.priority > wild.priority);
    }

    #[test]
    fn matches_path_extracts_params() {
        let p = PathInfo::parse("/user/:name").unwrap();
        let params = p.matches_path("/user/gopher").unwrap();
        assert_eq!(params, vec![("name".to_string(), "gopher".to_string())]);
    }

    #[test]
    fn wildcard_captures_remainder_with_leading_slash() {
        let p = PathInfo::parse("/src/*filepath").unwrap();
        let params = p.matches_path("/src/a/b.rs").unwrap();
        assert_eq!(params, vec![("filepath".to_string(), "/a/b.rs".to_string())]);
    }

    #[test]
    fn replace_path_round_trips() {
        let p = PathInfo::parse("/user/:name/items/*rest").unwrap();
        let concrete = "/user/gopher/items/a/b";
        let params = p.matches_path(concrete).unwrap();
        assert_eq!(p.replace_path(&params), concrete);
    }

    #[test]
    fn middleware_matches_broader_patterns() {
        let mw = PathInfo::parse("/api/*rest").unwrap();
        let route = PathInfo::parse("/api/v1/users").unwrap();
        assert!(mw.maybe_matches(&route));

        let mw2 = PathInfo::parse("/api/:version/users").unwrap();
        let route2 = PathInfo::parse("/api/:v/users").unwrap();
        assert!(mw2.maybe_matches(&route2));

        let mw3 = PathInfo::parse("/admin/users").unwrap();
        assert!(!mw3.maybe_matches(&route));
    }

    #[test]
    fn conflicts_on_identical_token_shape() {
        let a = PathInfo::parse("/src/*filepath").unwrap();
        let b = PathInfo::parse("/src/*").unwrap();
        assert!(a.conflicts_with(&b));

        let c = PathInfo::parse("/user/:id").unwrap();
        let d = PathInfo::parse("/user/:name").unwrap();
        assert!(c.conflicts_with(&d));

        let e = PathInfo::parse("/user/:id").unwrap();
        let f = PathInfo::parse("/admin/:id").unwrap();
        assert!(!e.conflicts_with(&f));
    }
}
