//! # Route Metadata
//!
//! Compiled form of a route pattern such as `/add/<int>/<int>`.
//!
//! Patterns are split on `/`. A segment is either literal text or exactly one
//! placeholder; `<path>` may only appear as the last segment because it
//! swallows the rest of the request path.

use crate::error::{Error, Result};
use crate::router::{HandlerId, Method};
use crate::types::ParamType;
use std::fmt;

/// One segment of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the request segment byte for byte
    Literal(String),
    /// Typed placeholder
    Capture(ParamType),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Capture(t) => write!(f, "{t}"),
        }
    }
}

/// Route metadata containing handler and type information
#[derive(Debug, Clone)]
pub struct RouteInfo {
    /// Unique handler identifier
    pub handler_id: HandlerId,
    /// Original path pattern (e.g., "/users/<int>")
    pub path_pattern: String,
    /// Parsed segments, root pattern `/` has none
    pub segments: Vec<Segment>,
    /// Pattern ends with `/` (e.g. "/about/")
    pub trailing_slash: bool,
    /// Methods this route answers
    pub methods: Vec<Method>,
    /// Unique name given through `Router::name_route`
    pub name: Option<String>,
}

impl RouteInfo {
    /// Create a new `RouteInfo` from a path pattern
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern does not start
    /// with `/`, contains an unknown placeholder, an empty inner segment, or
    /// a `<path>` placeholder that is not the last segment.
    pub fn new(handler_id: HandlerId, path: &str, methods: Vec<Method>) -> Result<Self> {
        let (segments, trailing_slash) = Self::parse_path_pattern(path)?;

        Ok(Self {
            handler_id,
            path_pattern: path.to_string(),
            segments,
            trailing_slash,
            methods,
            name: None,
        })
    }

    /// Parse a pattern into segments plus the trailing-slash flag
    fn parse_path_pattern(path: &str) -> Result<(Vec<Segment>, bool)> {
        let invalid = |reason: &str| Error::InvalidRoutePattern {
            pattern: path.to_string(),
            reason: reason.to_string(),
        };

        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| invalid("pattern must start with '/'"))?;
        if rest.is_empty() {
            return Ok((Vec::new(), false));
        }

        let trailing_slash = rest.ends_with('/');
        let body = rest.strip_suffix('/').unwrap_or(rest);

        let mut segments = Vec::new();
        for raw in body.split('/') {
            if raw.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if let Some(inner) = raw.strip_prefix('<') {
                let name = inner
                    .strip_suffix('>')
                    .ok_or_else(|| invalid("unterminated placeholder"))?;
                let param_type = ParamType::from_specifier(name)
                    .ok_or_else(|| invalid(&format!("unknown placeholder <{name}>")))?;
                segments.push(Segment::Capture(param_type));
            } else if raw.contains(['<', '>']) {
                return Err(invalid("placeholder must fill a whole segment"));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        let path_position = segments
            .iter()
            .position(|s| *s == Segment::Capture(ParamType::Path));
        if let Some(pos) = path_position {
            if pos + 1 != segments.len() || trailing_slash {
                return Err(invalid("<path> must be the last segment"));
            }
        }

        Ok((segments, trailing_slash))
    }

    /// Capture types in pattern order
    #[must_use]
    pub fn param_types(&self) -> Vec<ParamType> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Capture(t) => Some(*t),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str) -> RouteInfo {
        RouteInfo::new(0, path, vec![Method::Get]).unwrap()
    }

    #[test]
    fn test_route_info_simple() {
        let info = info("/users");
        assert_eq!(info.segments, vec![Segment::Literal("users".to_string())]);
        assert!(info.param_types().is_empty());
        assert!(!info.trailing_slash);
    }

    #[test]
    fn test_route_info_root() {
        let info = info("/");
        assert!(info.segments.is_empty());
        assert!(!info.trailing_slash);
    }

    #[test]
    fn test_route_info_multiple_params() {
        let info = info("/add/<int>/<int>");
        assert_eq!(info.param_types(), vec![ParamType::Int, ParamType::Int]);
    }

    #[test]
    fn test_route_info_mixed_types() {
        let info = info("/5/<int>/<uint>/<double>/<string>/<path>");
        assert_eq!(
            info.param_types(),
            vec![
                ParamType::Int,
                ParamType::Uint,
                ParamType::Double,
                ParamType::String,
                ParamType::Path
            ]
        );
    }

    #[test]
    fn test_route_info_trailing_slash() {
        let info = info("/path/");
        assert!(info.trailing_slash);
        assert_eq!(info.segments, vec![Segment::Literal("path".to_string())]);
    }

    #[test]
    fn test_route_info_rejects_bad_patterns() {
        for bad in ["users", "/a//b", "/<bool>", "/<int", "/x<int>", "/<path>/tail"] {
            assert!(
                RouteInfo::new(0, bad, vec![Method::Get]).is_err(),
                "{bad} should be rejected"
            );
        }
    }
}
