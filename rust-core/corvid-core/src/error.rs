//! # Error Handling
//!
//! Centralized error types for Corvid core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Client-side variants (`RouteNotFound`, `MethodNotAllowed`,
//! `MalformedRequest`, ...) never escape a connection: they are turned into
//! 4xx responses by [`Error::status`]. `Io` ends the connection.

use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for Corvid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Corvid runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Router failed to match the requested path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// The path is routed, but not for this method
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed {
        /// Method of the request
        method: String,
        /// The path that was matched under other methods
        path: String,
    },

    /// Request line, headers, body framing or a path capture is unusable
    #[error("Malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong with it
        reason: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Same pattern registered twice for one method
    #[error("Handler already exists for {method} {pattern}")]
    DuplicateRoute {
        /// Conflicting method
        method: String,
        /// Conflicting pattern
        pattern: String,
    },

    /// Handler signature does not fit the captures of its pattern
    #[error("Handler type is mismatched with URL parameters of {pattern}: {reason}")]
    HandlerMismatch {
        /// The route pattern
        pattern: String,
        /// Which argument disagreed
        reason: String,
    },

    /// Request method token the server does not implement
    #[error("Method not implemented: {method}")]
    UnsupportedMethod {
        /// Method token as received
        method: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// Request line plus headers exceed the configured head size
    #[error("Request header section exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Max allowed head size
        limit: usize,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {reason}")]
    Json {
        /// Parser or serializer message
        reason: String,
    },

    /// A route handler returned an error or panicked
    #[error("Handler failed: {message}")]
    HandlerFailure {
        /// Rendered handler error
        message: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::MalformedRequest`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// HTTP status a connection answers with when this error reaches it
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedRequest { .. } | Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::HeaderTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::UnsupportedMethod { .. } => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error was caused by the client rather than the server
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
