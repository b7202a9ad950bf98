//! # Corvid Core
//!
//! HTTP/1.1 micro-framework runtime: typed route table plus the
//! persistent-connection request cycle.
//!
//! ## Architecture
//!
//! Routes are registered on an [`App`] before serving starts. The [`Server`]
//! freezes it behind an `Arc` and hands it to one [`Connection`] task per
//! accepted socket. Each connection parses requests incrementally, asks the
//! router for a handler, and frames the response back with `Content-Length`
//! or chunked encoding.
//!
//! ## Modules
//!
//! - `server` - Accept loop, configuration, graceful shutdown
//! - `connection` - Per-connection read/parse/dispatch/write cycle
//! - `parser` - Incremental HTTP/1.x request parser
//! - `app` - Route registration and request dispatch
//! - `blueprint` - Prefixed route groups with their own catch-all
//! - `router` - Segment-trie router with typed captures
//! - `route` - Route pattern compilation
//! - `handler` - Closure adapters for route handlers
//! - `request` - HTTP request with headers and query parsing
//! - `response` - HTTP response and body sources
//! - `middleware` - Request/response middleware system
//! - `json` - JSON parsing with simd-json
//! - `types` - Path parameter types and conversion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod blueprint;
pub mod connection;
pub mod error;
pub mod handler;
pub mod json;
pub mod middleware;
pub mod parser;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod types;

pub use app::App;
pub use blueprint::Blueprint;
pub use connection::Connection;
pub use error::{Error, Result};
pub use handler::{FromParam, Handler, IntoHandler};
pub use json::{parse_json, to_json};
pub use middleware::{CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareResult};
pub use parser::{ParseLimits, ParseStatus, RequestParser};
pub use request::{QueryString, Request};
pub use response::{Body, HandlerResult, IntoResponse, Json, Response};
pub use route::RouteInfo;
pub use router::{Method, RouteMatch, Router};
pub use server::{Bytes, MalformedRequestPolicy, Server, ServerConfig};
pub use types::{ParamType, ParamValue, Params};

pub use hyper::StatusCode;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.1");
    }
}
