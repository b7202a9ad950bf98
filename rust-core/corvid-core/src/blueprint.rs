//! # Blueprints
//!
//! A blueprint groups routes under a shared URL prefix. It may carry its
//! own catch-all, which answers 404/405 misses under that prefix, and it
//! may nest child blueprints whose prefixes extend the parent's.
//!
//! ```text
//! let mut api = Blueprint::new("api");
//! api.get("/users", || "users");
//! let mut v1 = Blueprint::new("v1");
//! v1.get("/status", || "ok");           // served at /api/v1/status
//! api.register_blueprint(v1)?;
//! app.register_blueprint(api)?;
//! ```
//!
//! Patterns are compiled and checked when the blueprint is registered on an
//! [`App`](crate::App), not when a route is added to the blueprint.

use crate::error::{Error, Result};
use crate::handler::{Handler, IntoHandler};
use crate::router::Method;

/// A route waiting to be mounted
#[derive(Debug)]
pub(crate) struct PendingRoute {
    pub(crate) methods: Vec<Method>,
    pub(crate) pattern: String,
    pub(crate) handler: Handler,
}

/// Group of routes sharing a URL prefix
#[derive(Debug)]
pub struct Blueprint {
    prefix: String,
    pub(crate) routes: Vec<PendingRoute>,
    pub(crate) children: Vec<Blueprint>,
    pub(crate) catchall: Option<Handler>,
}

impl Blueprint {
    /// Create a blueprint mounted at `prefix` (surrounding `/` are ignored)
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            routes: Vec::new(),
            children: Vec::new(),
            catchall: None,
        }
    }

    /// Prefix relative to the parent, without slashes
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add a route; `pattern` is relative to the prefix and starts with `/`
    pub fn route<H, Args>(&mut self, methods: &[Method], pattern: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.routes.push(PendingRoute {
            methods: methods.to_vec(),
            pattern: pattern.to_string(),
            handler: handler.into_handler(),
        });
        self
    }

    /// Add a GET route
    pub fn get<H, Args>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Get], pattern, handler)
    }

    /// Add a POST route
    pub fn post<H, Args>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Post], pattern, handler)
    }

    /// Add a PUT route
    pub fn put<H, Args>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Put], pattern, handler)
    }

    /// Add a DELETE route
    pub fn delete<H, Args>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Delete], pattern, handler)
    }

    /// Catch-all for misses under this prefix
    ///
    /// Same argument rules as [`App::catchall`](crate::App::catchall).
    pub fn catchall<H, Args>(&mut self, handler: H) -> &mut Self
    where
        H: IntoHandler<Args>,
    {
        self.catchall = Some(handler.into_handler());
        self
    }

    /// Nest `child` under this blueprint
    ///
    /// # Errors
    ///
    /// `Error::DuplicateRoute` when a child with the same prefix is already
    /// nested here.
    pub fn register_blueprint(&mut self, child: Self) -> Result<()> {
        if self.children.iter().any(|c| c.prefix == child.prefix) {
            return Err(Error::DuplicateRoute {
                method: "blueprint".to_string(),
                pattern: format!("{}/{}", self.prefix, child.prefix),
            });
        }
        self.children.push(child);
        Ok(())
    }
}

/// Whether `path` lies under the mount point `/prefix`
pub(crate) fn under_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|p| p.strip_prefix(prefix))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
