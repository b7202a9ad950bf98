//! # Middleware System
//!
//! Request/response interception around route handlers.
//!
//! Middlewares run in registration order before the handler and in reverse
//! order after it. A `before_request` hook may answer on its own, in which
//! case routing and the handler are skipped but the `after_response` hooks
//! still run.

use crate::request::Request;
use crate::response::Response;
use crate::router::Method;
use hyper::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync {
    /// Called before routing
    ///
    /// Can return early with a response.
    fn before_request(&self, _req: &Request) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the handler (or an early response)
    fn after_response(&self, _req: &Request, _res: &mut Response) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// Short-circuit with this response (skip handler)
    Respond(Response),
}

/// Ordered middleware list
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        debug!(middleware = middleware.name(), "middleware added");
        self.middlewares.push(Arc::new(middleware));
    }

    /// Run every `before_request` until one responds
    pub fn run_before(&self, req: &Request) -> MiddlewareResult {
        for mw in &self.middlewares {
            if let MiddlewareResult::Respond(res) = mw.before_request(req) {
                debug!(middleware = mw.name(), status = res.status.as_u16(), "short-circuit");
                return MiddlewareResult::Respond(res);
            }
        }
        MiddlewareResult::Continue
    }

    /// Run every `after_response` in reverse order
    pub fn run_after(&self, req: &Request, res: &mut Response) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, res);
        }
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Structured request/response logging
#[derive(Debug, Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log request headers (debug level)
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        let request_id = req.header("x-request-id").unwrap_or("-");
        info!(
            method = %req.method,
            path = %req.path,
            request_id = %request_id,
            "Request received"
        );
        if self.log_headers {
            for (name, value) in req.headers() {
                debug!(header = %name, value = ?value, "request header");
            }
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &Request, res: &mut Response) {
        let request_id = req.header("x-request-id").unwrap_or("-");
        info!(
            method = %req.method,
            path = %req.path,
            status = res.status.as_u16(),
            request_id = %request_id,
            "Response sent"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// Cross-Origin Resource Sharing headers and preflight answers
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
    max_age: Option<u64>,
    allow_credentials: bool,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type".to_string(),
            max_age: None,
            allow_credentials: false,
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: &[Method]) -> Self {
        self.allow_methods = methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// How long a preflight result may be cached, in seconds
    #[must_use]
    pub const fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Send `Access-Control-Allow-Credentials: true`
    #[must_use]
    pub const fn allow_credentials(mut self) -> Self {
        self.allow_credentials = true;
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }

    fn apply(&self, res: &mut Response) {
        res.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        res.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        res.set_header("Access-Control-Allow-Headers", &self.allow_headers);
        if let Some(max_age) = self.max_age {
            res.set_header("Access-Control-Max-Age", &max_age.to_string());
        }
        if self.allow_credentials {
            res.set_header("Access-Control-Allow-Credentials", "true");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        let preflight = req.method == Method::Options
            && req.header("access-control-request-method").is_some();
        if preflight {
            return MiddlewareResult::Respond(Response::new(StatusCode::NO_CONTENT));
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, _req: &Request, res: &mut Response) {
        self.apply(res);
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}
