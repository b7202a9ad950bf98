//! # Application
//!
//! The route table together with its handlers, middleware and catch-alls.
//! Built once before serving, then shared read-only by every connection.
//!
//! Handlers are stored under the [`HandlerId`] the router hands out, so the
//! table and the router cannot drift apart.

use crate::blueprint::{under_prefix, Blueprint};
use crate::error::{Error, Result};
use crate::handler::{Handler, IntoHandler};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareResult};
use crate::request::Request;
use crate::response::Response;
use crate::router::{HandlerId, Method, RouteMatch, Router};
use crate::types::{ParamType, ParamValue, Params};
use futures_util::FutureExt;
use hyper::StatusCode;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Routes, handlers and middleware of one server
#[derive(Debug, Default)]
pub struct App {
    router: Router,
    /// Indexed by `HandlerId`
    handlers: Vec<Option<Handler>>,
    middleware: MiddlewareChain,
    catchall: Option<Handler>,
    /// Full blueprint prefixes, in mount order
    mounted: Vec<String>,
    /// Catch-alls of mounted blueprints, keyed by full prefix
    scoped_catchalls: Vec<(String, Handler)>,
}

impl App {
    /// Create an empty application
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern` under every method in `methods`
    ///
    /// # Errors
    ///
    /// `Error::InvalidRoutePattern`, `Error::DuplicateRoute`, or
    /// `Error::HandlerMismatch` when the handler's arguments do not fit the
    /// pattern's captures. Nothing is registered on error.
    pub fn route<H, Args>(&mut self, methods: &[Method], pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        let handler = handler.into_handler();
        let id = self.router.add_route_checked(methods, pattern, |info| {
            handler.check(pattern, &info.param_types())
        })?;

        if self.handlers.len() <= id {
            self.handlers.resize_with(id + 1, || None);
        }
        self.handlers[id] = Some(handler);
        debug!(?methods, pattern, id, "route registered");
        Ok(id)
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn get<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Get], pattern, handler)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn post<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Post], pattern, handler)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn put<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Put], pattern, handler)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn delete<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Delete], pattern, handler)
    }

    /// Register a PATCH route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn patch<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.route(&[Method::Patch], pattern, handler)
    }

    /// Handler for requests that match no route (404) or no method (405)
    ///
    /// It may take no capture or a single `u64`, which receives the status.
    /// A `200 OK` it returns is replaced by that status.
    ///
    /// # Errors
    ///
    /// `Error::HandlerMismatch` for any other argument list.
    pub fn catchall<H, Args>(&mut self, handler: H) -> Result<()>
    where
        H: IntoHandler<Args>,
    {
        let handler = handler.into_handler();
        check_catchall(&handler)?;
        self.catchall = Some(handler);
        Ok(())
    }

    /// Mount `blueprint` and its nested blueprints
    ///
    /// Every route is registered at `/prefix/pattern`; a blueprint catch-all
    /// answers misses under its prefix ahead of the global one, the deepest
    /// blueprint first.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRoutePattern` for an empty prefix,
    /// `Error::DuplicateRoute` when the prefix is already mounted, and any
    /// error of [`App::route`] or [`App::catchall`]. Routes mounted before
    /// the failing one stay registered.
    pub fn register_blueprint(&mut self, blueprint: Blueprint) -> Result<()> {
        self.mount(blueprint, "")
    }

    fn mount(&mut self, blueprint: Blueprint, parent: &str) -> Result<()> {
        if blueprint.prefix().is_empty() {
            return Err(Error::InvalidRoutePattern {
                pattern: format!("/{parent}"),
                reason: "blueprint prefix is empty".to_string(),
            });
        }
        let full = if parent.is_empty() {
            blueprint.prefix().to_string()
        } else {
            format!("{parent}/{}", blueprint.prefix())
        };
        if self.mounted.contains(&full) {
            return Err(Error::DuplicateRoute {
                method: "blueprint".to_string(),
                pattern: format!("/{full}"),
            });
        }
        self.mounted.push(full.clone());

        let Blueprint {
            routes,
            children,
            catchall,
            ..
        } = blueprint;

        if let Some(handler) = catchall {
            check_catchall(&handler)?;
            self.scoped_catchalls.push((full.clone(), handler));
        }
        for route in routes {
            let pattern = format!("/{full}{}", route.pattern);
            self.route(&route.methods, &pattern, route.handler)?;
        }
        debug!(prefix = %full, "blueprint mounted");

        for child in children {
            self.mount(child, &full)?;
        }
        Ok(())
    }

    /// Add a middleware to the chain
    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.add(middleware);
    }

    /// The route table
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Give the route `id` a unique name
    ///
    /// # Errors
    ///
    /// See [`Router::name_route`].
    pub fn name_route(&mut self, id: HandlerId, name: &str) -> Result<()> {
        self.router.name_route(id, name)
    }

    /// Turn a request into a response
    ///
    /// Never fails: routing misses become 404/405/400 and handler errors or
    /// panics become 500.
    pub async fn handle(&self, req: Request) -> Response {
        if self.middleware.is_empty() {
            return self.dispatch(req).await;
        }

        let snapshot = req.clone();
        let mut response = match self.middleware.run_before(&req) {
            MiddlewareResult::Respond(res) => res,
            MiddlewareResult::Continue => self.dispatch(req).await,
        };
        self.middleware.run_after(&snapshot, &mut response);
        response
    }

    async fn dispatch(&self, req: Request) -> Response {
        let routed = self.router.match_route(req.method, &req.path);

        if req.method == Method::Options && !matches!(routed, Ok(RouteMatch::Found(_))) {
            return self.options(req).await;
        }

        match routed {
            Ok(RouteMatch::Found(m)) => match self.handlers.get(m.handler_id).and_then(Option::as_ref) {
                Some(handler) => invoke(handler, req, m.params).await,
                None => Response::error(StatusCode::INTERNAL_SERVER_ERROR),
            },
            Ok(RouteMatch::RedirectSlash) => redirect_with_slash(&req),
            Err(e) => self.miss(req, &e).await,
        }
    }

    /// Automatic `OPTIONS` answer listing the allowed methods
    async fn options(&self, req: Request) -> Response {
        let methods = if req.path == "/*" || req.path == "*" {
            self.router.routed_methods()
        } else {
            self.router.allowed_methods(&req.path)
        };
        if methods.is_empty() {
            let e = Error::RouteNotFound {
                path: req.path.clone(),
            };
            return self.miss(req, &e).await;
        }
        Response::new(StatusCode::NO_CONTENT).with_header("Allow", &allow_header(&methods))
    }

    /// Answer a routing failure, through the catch-all when it applies
    async fn miss(&self, req: Request, e: &Error) -> Response {
        let status = e.status();
        let allow = match e {
            Error::MethodNotAllowed { .. } => Some(allow_header(&self.router.allowed_methods(&req.path))),
            _ => None,
        };

        let mut response = match self.catchall_for(&req.path) {
            Some(handler)
                if status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED =>
            {
                let params = if handler.arity() == Some(0) {
                    Params::default()
                } else {
                    Params::new(vec![ParamValue::Uint(u64::from(status.as_u16()))])
                };
                let mut res = invoke(handler, req, params).await;
                if res.status == StatusCode::OK {
                    res.status = status;
                }
                res
            }
            _ => Response::error(status),
        };

        if let Some(allow) = allow {
            response.set_header("Allow", &allow);
        }
        response
    }

    /// Deepest blueprint catch-all covering `path`, else the global one
    fn catchall_for(&self, path: &str) -> Option<&Handler> {
        self.scoped_catchalls
            .iter()
            .filter(|(prefix, _)| under_prefix(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| handler)
            .or(self.catchall.as_ref())
    }
}

/// A catch-all takes no capture or a single `u64` status
fn check_catchall(handler: &Handler) -> Result<()> {
    if handler.check("catchall", &[]).is_err() {
        handler.check("catchall", &[ParamType::Uint])?;
    }
    Ok(())
}

/// Run a handler, mapping failures and panics to error responses
async fn invoke(handler: &Handler, mut req: Request, params: Params) -> Response {
    req.params = params.clone();
    let path = req.path.clone();

    match AssertUnwindSafe(handler.call(req, params)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => match err.downcast_ref::<Error>() {
            Some(e) if e.is_client_error() => {
                debug!(path, error = %e, "handler rejected request");
                Response::error(e.status())
            }
            _ => {
                let failure = Error::HandlerFailure {
                    message: format!("{err:#}"),
                };
                error!(path, "{failure}");
                Response::error(failure.status())
            }
        },
        Err(panic) => {
            let failure = Error::HandlerFailure {
                message: panic_message(panic.as_ref()),
            };
            error!(path, "{failure}");
            Response::error(failure.status())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// `OPTIONS, HEAD, ...` for the `Allow` header
fn allow_header(methods: &[Method]) -> String {
    let mut allow = vec![Method::Options.as_str(), Method::Head.as_str()];
    allow.extend(
        methods
            .iter()
            .filter(|m| !matches!(m, Method::Options | Method::Head))
            .map(Method::as_str),
    );
    allow.join(", ")
}

/// 301 to the same path with a trailing slash
fn redirect_with_slash(req: &Request) -> Response {
    let query = req
        .raw_url
        .split_once('?')
        .map_or(String::new(), |(_, q)| format!("?{q}"));
    let location = match req.header("host") {
        Some(host) => format!("http://{host}{}/{query}", req.path),
        None => format!("{}/{query}", req.path),
    };
    Response::redirect(StatusCode::MOVED_PERMANENTLY, &location)
}
