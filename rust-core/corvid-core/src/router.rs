//! # Router
//!
//! Per-method segment tries with typed captures.
//!
//! ## Matching
//!
//! The request path is split on `/` and walked against the trie. At every
//! depth an exact literal edge is tried first, then capture edges in
//! [`ParamType::PRIORITY`] order (int, uint, double, string, path). The walk
//! backtracks, so `/x/500x` can still land on `/x/<string>` when
//! `/x/<int>` rejects it. The first complete match wins, which makes the
//! choice deterministic: most specific literal first, then the narrowest
//! capture.
//!
//! A miss is classified as:
//! - `MethodNotAllowed` when another method's trie matches the path,
//! - `MalformedRequest` when a numeric capture overflowed along the way,
//! - `RouteNotFound` otherwise.
//!
//! The router is read-only once serving starts and is shared by reference.

use crate::error::{Error, Result};
use crate::route::{RouteInfo, Segment};
use crate::types::{Capture, ParamType, ParamValue, Params};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
    /// HTTP CONNECT
    Connect,
    /// HTTP TRACE
    Trace,
}

impl Method {
    /// Every method, in display order
    pub const ALL: [Self; 9] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Head,
        Self::Options,
        Self::Connect,
        Self::Trace,
    ];

    /// Parse a request-line method token (case-sensitive)
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == token)
    }

    /// Canonical token
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route handler identifier
pub type HandlerId = usize;

/// Matched route with extracted and converted parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// The handler ID for this route
    pub handler_id: HandlerId,
    /// Typed captures in pattern order
    pub params: Params,
}

/// Successful routing outcome
#[derive(Debug, Clone, PartialEq)]
pub enum RouteMatch {
    /// A handler accepts the path
    Found(Match),
    /// Only the same path with a trailing slash is routed
    RedirectSlash,
}

/// What a trie node resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Handler(HandlerId),
    RedirectSlash,
}

#[derive(Debug, Clone, Default)]
struct Node {
    slot: Option<Slot>,
    literals: HashMap<String, Node>,
    /// Ordered by `ParamType`'s derived `Ord`, which is the priority order
    captures: BTreeMap<ParamType, Node>,
}

impl Node {
    fn descend(&mut self, segment: &Segment) -> &mut Self {
        match segment {
            Segment::Literal(s) => self.literals.entry(s.clone()).or_default(),
            Segment::Capture(t) => self.captures.entry(*t).or_default(),
        }
    }

    fn lookup(&self, segments: &[Segment]) -> Option<&Self> {
        segments.iter().try_fold(self, |node, segment| match segment {
            Segment::Literal(s) => node.literals.get(s),
            Segment::Capture(t) => node.captures.get(t),
        })
    }

    fn size(&self) -> usize {
        1 + self.literals.values().map(Self::size).sum::<usize>()
            + self.captures.values().map(Self::size).sum::<usize>()
    }

    fn log(&self, depth: usize) {
        for (key, child) in &self.literals {
            debug!("{:indent$}{key}", "", indent = depth * 2);
            child.log(depth + 1);
        }
        for (param, child) in &self.captures {
            debug!("{:indent$}{param}", "", indent = depth * 2);
            child.log(depth + 1);
        }
    }
}

/// A request path split into segments, keeping offsets for `<path>`
struct PathSegments<'a> {
    rest: &'a str,
    segments: Vec<&'a str>,
    offsets: Vec<usize>,
}

impl<'a> PathSegments<'a> {
    fn new(path: &'a str) -> Self {
        let rest = path.strip_prefix('/').unwrap_or(path);
        let mut segments = Vec::new();
        let mut offsets = Vec::new();
        if !rest.is_empty() {
            let mut offset = 0;
            for segment in rest.split('/') {
                segments.push(segment);
                offsets.push(offset);
                offset += segment.len() + 1;
            }
        }
        Self {
            rest,
            segments,
            offsets,
        }
    }
}

#[derive(Default)]
struct Walk {
    params: Vec<ParamValue>,
    overflow: bool,
}

impl Walk {
    fn find(&mut self, node: &Node, path: &PathSegments<'_>, idx: usize) -> Option<Slot> {
        let Some(segment) = path.segments.get(idx) else {
            return node.slot;
        };

        if let Some(child) = node.literals.get(*segment) {
            if let Some(slot) = self.find(child, path, idx + 1) {
                return Some(slot);
            }
        }

        for (param_type, child) in &node.captures {
            let (raw, next) = if *param_type == ParamType::Path {
                (&path.rest[path.offsets[idx]..], path.segments.len())
            } else {
                (*segment, idx + 1)
            };
            match param_type.capture(raw) {
                Capture::Matched(value) => {
                    self.params.push(value);
                    if let Some(slot) = self.find(child, path, next) {
                        return Some(slot);
                    }
                    self.params.pop();
                }
                Capture::Overflow => self.overflow = true,
                Capture::Rejected => {}
            }
        }

        None
    }
}

/// Per-method storage for routes
#[derive(Debug, Clone, Default)]
struct MethodRoutes {
    root: Node,
}

impl MethodRoutes {
    fn resolve(&self, path: &PathSegments<'_>) -> (Option<Slot>, Walk) {
        let mut walk = Walk::default();
        let slot = walk.find(&self.root, path, 0);
        (slot, walk)
    }
}

/// Segment-trie HTTP router
#[derive(Debug, Clone, Default)]
pub struct Router {
    /// Per-method tries
    method_routes: HashMap<Method, MethodRoutes>,
    /// Route metadata indexed by handler ID
    routes: Vec<RouteInfo>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route for the given methods
    ///
    /// A pattern with a trailing slash (`/about/`) also installs a redirect
    /// slot for the slash-less path unless that path already has a handler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed and
    /// `Error::DuplicateRoute` if one of the methods already routes the
    /// same pattern. Nothing is registered on error.
    pub fn add_route(&mut self, methods: &[Method], path: &str) -> Result<HandlerId> {
        self.add_route_checked(methods, path, |_| Ok(()))
    }

    /// Register a route after `check` accepted its compiled metadata
    ///
    /// # Errors
    ///
    /// Whatever `check` returns, plus the errors of [`Router::add_route`].
    /// Nothing is registered on error.
    pub fn add_route_checked<F>(&mut self, methods: &[Method], path: &str, check: F) -> Result<HandlerId>
    where
        F: FnOnce(&RouteInfo) -> Result<()>,
    {
        let mut methods = methods.to_vec();
        methods.sort_unstable();
        methods.dedup();
        if methods.is_empty() {
            return Err(Error::InvalidRoutePattern {
                pattern: path.to_string(),
                reason: "route needs at least one method".to_string(),
            });
        }

        let handler_id = self.routes.len();
        let info = RouteInfo::new(handler_id, path, methods.clone())?;
        check(&info)?;
        let full = Self::full_segments(&info);

        for method in &methods {
            let taken = self
                .method_routes
                .get(method)
                .and_then(|r| r.root.lookup(&full))
                .is_some_and(|n| matches!(n.slot, Some(Slot::Handler(_))));
            if taken {
                return Err(Error::DuplicateRoute {
                    method: method.to_string(),
                    pattern: path.to_string(),
                });
            }
        }

        for method in &methods {
            let routes = self.method_routes.entry(*method).or_default();
            let node = full
                .iter()
                .fold(&mut routes.root, |node, segment| node.descend(segment));
            node.slot = Some(Slot::Handler(handler_id));

            if info.trailing_slash {
                let node = info
                    .segments
                    .iter()
                    .fold(&mut routes.root, |node, segment| node.descend(segment));
                if node.slot.is_none() {
                    node.slot = Some(Slot::RedirectSlash);
                }
            }
        }

        self.routes.push(info);
        Ok(handler_id)
    }

    /// Segments as stored in the trie; a trailing slash is an empty literal
    fn full_segments(info: &RouteInfo) -> Vec<Segment> {
        let mut segments = info.segments.clone();
        if info.trailing_slash {
            segments.push(Segment::Literal(String::new()));
        }
        segments
    }

    /// Match a request path against registered routes
    ///
    /// `HEAD` falls back to the `GET` routes when it has no route of its own.
    ///
    /// # Errors
    ///
    /// `Error::MethodNotAllowed`, `Error::MalformedRequest` (capture out of
    /// range) or `Error::RouteNotFound`, in that order of precedence.
    pub fn match_route(&self, method: Method, path: &str) -> Result<RouteMatch> {
        let segments = PathSegments::new(path);

        let mut overflow = false;
        let mut candidates = vec![method];
        if method == Method::Head {
            candidates.push(Method::Get);
        }

        for candidate in candidates {
            let Some(routes) = self.method_routes.get(&candidate) else {
                continue;
            };
            let (slot, walk) = routes.resolve(&segments);
            overflow |= walk.overflow;
            match slot {
                Some(Slot::Handler(handler_id)) => {
                    return Ok(RouteMatch::Found(Match {
                        handler_id,
                        params: Params::new(walk.params),
                    }));
                }
                Some(Slot::RedirectSlash) => return Ok(RouteMatch::RedirectSlash),
                None => {}
            }
        }

        if !self.allowed_methods(path).is_empty() {
            debug!(%method, path, "Cannot match method");
            return Err(Error::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        if overflow {
            debug!(path, "Capture value out of range");
            return Err(Error::malformed(format!(
                "path capture out of range in {path}"
            )));
        }

        debug!(path, "Cannot match rules");
        Err(Error::RouteNotFound {
            path: path.to_string(),
        })
    }

    /// Methods whose routes match `path`
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let segments = PathSegments::new(path);
        let mut methods: Vec<Method> = self
            .method_routes
            .iter()
            .filter(|(_, routes)| routes.resolve(&segments).0.is_some())
            .map(|(method, _)| *method)
            .collect();
        methods.sort_unstable();
        methods
    }

    /// Methods that have at least one route
    #[must_use]
    pub fn routed_methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.method_routes.keys().copied().collect();
        methods.sort_unstable();
        methods
    }

    /// Metadata of a registered route
    #[must_use]
    pub fn route_info(&self, handler_id: HandlerId) -> Option<&RouteInfo> {
        self.routes.get(handler_id)
    }

    /// Give a registered route a unique name
    ///
    /// # Errors
    ///
    /// `Error::RouteNotFound` for an unknown id and `Error::DuplicateRoute`
    /// when another route already carries `name`.
    pub fn name_route(&mut self, handler_id: HandlerId, name: &str) -> Result<()> {
        if let Some(other) = self.route_by_name(name) {
            if other.handler_id != handler_id {
                return Err(Error::DuplicateRoute {
                    method: "name".to_string(),
                    pattern: name.to_string(),
                });
            }
        }
        let info = self
            .routes
            .get_mut(handler_id)
            .ok_or_else(|| Error::RouteNotFound {
                path: format!("#{handler_id}"),
            })?;
        info.name = Some(name.to_string());
        Ok(())
    }

    /// Route registered under `name`
    #[must_use]
    pub fn route_by_name(&self, name: &str) -> Option<&RouteInfo> {
        self.routes
            .iter()
            .find(|info| info.name.as_deref() == Some(name))
    }

    /// All registered routes in registration order
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dump every trie at debug level
    pub fn log_routes(&self) {
        for method in self.routed_methods() {
            if let Some(routes) = self.method_routes.get(&method) {
                debug!(%method, nodes = routes.root.size(), "route trie");
                routes.root.log(1);
            }
        }
        for info in &self.routes {
            if let Some(name) = &info.name {
                debug!(name, pattern = %info.path_pattern, id = info.handler_id, "named route");
            }
        }
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn get(&mut self, path: &str) -> Result<HandlerId> {
        self.add_route(&[Method::Get], path)
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn post(&mut self, path: &str) -> Result<HandlerId> {
        self.add_route(&[Method::Post], path)
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn put(&mut self, path: &str) -> Result<HandlerId> {
        self.add_route(&[Method::Put], path)
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn delete(&mut self, path: &str) -> Result<HandlerId> {
        self.add_route(&[Method::Delete], path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(router: &Router, method: Method, path: &str) -> Match {
        match router.match_route(method, path).unwrap() {
            RouteMatch::Found(m) => m,
            RouteMatch::RedirectSlash => panic!("unexpected redirect for {path}"),
        }
    }

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();

        let id1 = router.get("/").unwrap();
        let id2 = router.get("/users").unwrap();
        let id3 = router.post("/users").unwrap();

        assert_eq!((id1, id2, id3), (0, 1, 2));
        assert_eq!(found(&router, Method::Get, "/").handler_id, 0);
        assert_eq!(found(&router, Method::Get, "/users").handler_id, 1);
        assert_eq!(found(&router, Method::Post, "/users").handler_id, 2);
    }

    #[test]
    fn test_typed_captures() {
        let mut router = Router::new();
        router
            .get("/5/<int>/<uint>/<double>/<string>/<path>")
            .unwrap();

        let m = found(
            &router,
            Method::Get,
            "/5/-5/999/3.141592/hello_there/a/b/c/d",
        );
        assert_eq!(m.params.int(0), Some(-5));
        assert_eq!(m.params.uint(1), Some(999));
        assert_eq!(m.params.float(2), Some(3.141_592));
        assert_eq!(m.params.str(3), Some("hello_there"));
        assert_eq!(m.params.str(4), Some("a/b/c/d"));
    }

    #[test]
    fn test_add_captures() {
        let mut router = Router::new();
        router.get("/add/<int>/<int>").unwrap();

        let m = found(&router, Method::Get, "/add/1/2");
        assert_eq!(m.params.int(0), Some(1));
        assert_eq!(m.params.int(1), Some(2));
    }

    #[test]
    fn test_literal_beats_capture() {
        let mut router = Router::new();
        let capture = router.get("/users/<string>").unwrap();
        let literal = router.get("/users/me").unwrap();

        assert_eq!(found(&router, Method::Get, "/users/me").handler_id, literal);
        assert_eq!(found(&router, Method::Get, "/users/you").handler_id, capture);
    }

    #[test]
    fn test_int_beats_string_and_partial_numbers_fall_through() {
        let mut router = Router::new();
        let string = router.get("/x/<string>").unwrap();
        let int = router.get("/x/<int>").unwrap();

        let m = found(&router, Method::Get, "/x/500");
        assert_eq!(m.handler_id, int);
        assert_eq!(m.params.int(0), Some(500));

        let m = found(&router, Method::Get, "/x/500x");
        assert_eq!(m.handler_id, string);
        assert_eq!(m.params.str(0), Some("500x"));
    }

    #[test]
    fn test_backtracks_from_literal() {
        let mut router = Router::new();
        let literal = router.get("/a/b/c").unwrap();
        let capture = router.get("/a/<string>/d").unwrap();

        assert_eq!(found(&router, Method::Get, "/a/b/c").handler_id, literal);
        assert_eq!(found(&router, Method::Get, "/a/b/d").handler_id, capture);
    }

    #[test]
    fn test_partial_number_without_fallback_is_not_found() {
        let mut router = Router::new();
        router.get("/hello/<int>").unwrap();

        let err = router.match_route(Method::Get, "/hello/500x").unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { .. }));
    }

    #[test]
    fn test_overflow_is_bad_request() {
        let mut router = Router::new();
        router.get("/hello/<int>").unwrap();

        let err = router
            .match_route(Method::Get, "/hello/99999999999999999999")
            .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
    }

    #[test]
    fn test_overflow_accepted_by_string_overload() {
        let mut router = Router::new();
        router.get("/hello/<int>").unwrap();
        let string = router.get("/hello/<string>").unwrap();

        let m = found(&router, Method::Get, "/hello/99999999999999999999");
        assert_eq!(m.handler_id, string);
    }

    #[test]
    fn test_route_not_found() {
        let mut router = Router::new();
        router.get("/0/<uint>").unwrap();

        let result = router.match_route(Method::Get, "/-1");
        assert!(matches!(result, Err(Error::RouteNotFound { .. })));

        let result = router.match_route(Method::Get, "/0/-1");
        assert!(matches!(result, Err(Error::RouteNotFound { .. })));
    }

    #[test]
    fn test_method_not_allowed() {
        let mut router = Router::new();
        router.get("/users").unwrap();

        let result = router.match_route(Method::Post, "/users");
        assert!(matches!(result, Err(Error::MethodNotAllowed { .. })));
        assert_eq!(router.allowed_methods("/users"), vec![Method::Get]);
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let mut router = Router::new();
        let id = router.get("/").unwrap();

        assert_eq!(found(&router, Method::Head, "/").handler_id, id);
    }

    #[test]
    fn test_trailing_slash_redirect() {
        let mut router = Router::new();
        router.get("/path/").unwrap();
        router.get("/file").unwrap();

        assert!(matches!(
            router.match_route(Method::Get, "/path/").unwrap(),
            RouteMatch::Found(_)
        ));
        assert_eq!(
            router.match_route(Method::Get, "/path").unwrap(),
            RouteMatch::RedirectSlash
        );
        assert!(matches!(
            router.match_route(Method::Get, "/file/"),
            Err(Error::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut router = Router::new();
        router.get("/a/<int>").unwrap();

        let err = router.get("/a/<int>").unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { .. }));
        assert!(router.post("/a/<int>").is_ok());
    }

    #[test]
    fn test_multi_method_route() {
        let mut router = Router::new();
        let id = router
            .add_route(&[Method::Get, Method::Post, Method::Get], "/both")
            .unwrap();

        assert_eq!(found(&router, Method::Get, "/both").handler_id, id);
        assert_eq!(found(&router, Method::Post, "/both").handler_id, id);
        assert_eq!(router.route_info(id).unwrap().methods.len(), 2);
    }

    #[test]
    fn test_empty_segments_do_not_match_captures() {
        let mut router = Router::new();
        router.get("/hello/<string>").unwrap();

        assert!(router.match_route(Method::Get, "/hello/").is_err());
        assert!(router.match_route(Method::Get, "/hello//x").is_err());
    }

    #[test]
    fn test_rejected_check_registers_nothing() {
        let mut router = Router::new();
        let err = router
            .add_route_checked(&[Method::Get], "/x/<int>", |_| Err(Error::malformed("no")))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
        assert!(router.is_empty());
        assert!(router.match_route(Method::Get, "/x/1").is_err());

        let id = router
            .add_route_checked(&[Method::Get], "/x/<int>", |info| {
                assert_eq!(info.param_types(), vec![ParamType::Int]);
                Ok(())
            })
            .unwrap();
        assert_eq!(id, 0);
    }

    #[test]
    fn test_named_routes() {
        let mut router = Router::new();
        let users = router.get("/users").unwrap();
        let posts = router.get("/posts").unwrap();

        router.name_route(users, "users").unwrap();
        assert_eq!(router.route_by_name("users").unwrap().path_pattern, "/users");
        assert!(router.route_by_name("posts").is_none());

        assert!(matches!(
            router.name_route(posts, "users"),
            Err(Error::DuplicateRoute { .. })
        ));
        assert!(matches!(
            router.name_route(99, "ghost"),
            Err(Error::RouteNotFound { .. })
        ));
        router.log_routes();
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET"), Some(Method::Get));
        assert_eq!(Method::parse("OPTIONS"), Some(Method::Options));
        assert_eq!(Method::parse("get"), None);
        assert_eq!(Method::parse("BREW"), None);
    }
}
