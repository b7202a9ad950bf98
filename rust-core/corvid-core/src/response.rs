//! # HTTP Response
//!
//! A response is a status, headers and a body source. The body is either a
//! buffer with a known length or a lazy stream of chunks; the connection
//! writer picks `Content-Length` or chunked framing from that before the
//! first byte goes out.

use crate::json::to_json;
use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::Stream;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{HeaderMap, StatusCode};
use serde::Serialize;
use std::fmt;
use std::io;

/// What a handler produces: a response, or a failure mapped to 500
pub type HandlerResult = std::result::Result<Response, anyhow::Error>;

/// Response body source
pub enum Body {
    /// No body
    Empty,
    /// Buffered body, sent with `Content-Length`
    Full(Bytes),
    /// Lazily produced chunks, sent chunked unless a length was set
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Wrap a chunk stream
    pub fn from_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(chunks.boxed())
    }

    /// Byte length when known up front
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Full(b) => Some(b.len()),
            Self::Stream(_) => None,
        }
    }

    /// Whether the body is known to be empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Whether the body is produced lazily
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Full(b) => f.debug_tuple("Body::Full").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        if b.is_empty() {
            Self::Empty
        } else {
            Self::Full(b)
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

/// HTTP response
#[derive(Debug)]
pub struct Response {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    /// Empty response with `status`
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<Body>) -> Self {
        Self::with_body("text/plain", body)
    }

    /// Create an HTML response
    #[must_use]
    pub fn html(body: impl Into<Body>) -> Self {
        Self::with_body("text/html", body)
    }

    /// Create a JSON response from already-serialized text
    #[must_use]
    pub fn json(body: impl Into<Body>) -> Self {
        Self::with_body("application/json", body)
    }

    /// Create a binary response
    #[must_use]
    pub fn bytes(body: impl Into<Body>) -> Self {
        Self::with_body("application/octet-stream", body)
    }

    /// Create a streamed response from a chunk stream
    pub fn stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let mut res = Self::new(StatusCode::OK);
        res.body = Body::from_stream(chunks);
        res
    }

    /// Create a streamed response from an iterator of chunks
    pub fn chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Redirect to `location` with a 3xx `status`
    #[must_use]
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        Self::new(status).with_header(LOCATION.as_str(), location)
    }

    /// Canonical error response: status with its reason phrase as text
    #[must_use]
    pub fn error(status: StatusCode) -> Self {
        Self::text(status.canonical_reason().unwrap_or("Error")).with_status(status)
    }

    fn with_body(content_type: &'static str, body: impl Into<Body>) -> Self {
        let mut res = Self::new(StatusCode::OK);
        res.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        res.body = body.into();
        res
    }

    /// Set status code
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set header, replacing any previous value
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    ///
    /// Invalid names or values are ignored.
    pub fn set_header(&mut self, key: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Append a header, keeping existing values
    pub fn add_header(&mut self, key: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(n, v);
        }
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// `Content-Length` set explicitly by the handler
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the handler asked for the connection to close
    #[must_use]
    pub fn wants_close(&self) -> bool {
        self.headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("close"))
    }

    /// Whether this status may carry a body at all
    #[must_use]
    pub fn allows_body(&self) -> bool {
        !(self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED)
    }

    /// Buffered body bytes, if the body is not streamed
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Empty => Some(&[]),
            Body::Full(b) => Some(b),
            Body::Stream(_) => None,
        }
    }
}

/// Conversion of handler return values into responses
pub trait IntoResponse {
    /// Convert into a response or a handler failure
    ///
    /// # Errors
    ///
    /// Returns the handler's failure, which is answered with a 500.
    fn into_response(self) -> HandlerResult;
}

impl IntoResponse for Response {
    fn into_response(self) -> HandlerResult {
        Ok(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> HandlerResult {
        Ok(Response::text(self))
    }
}

impl IntoResponse for String {
    fn into_response(self) -> HandlerResult {
        Ok(Response::text(self))
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> HandlerResult {
        Ok(Response::bytes(self))
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> HandlerResult {
        Ok(Response::bytes(self))
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> HandlerResult {
        Ok(Response::new(self))
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> HandlerResult {
        let (status, inner) = self;
        Ok(inner.into_response()?.with_status(status))
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> HandlerResult {
        Json(self).into_response()
    }
}

impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: Into<anyhow::Error>,
{
    fn into_response(self) -> HandlerResult {
        self.map_err(Into::into).and_then(IntoResponse::into_response)
    }
}

/// Serialize `T` as a JSON response body
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> HandlerResult {
        Ok(Response::json(to_json(&self.0)?))
    }
}
