//! # HTTP Request
//!
//! A fully received request: head, body and the typed captures of the
//! route it was dispatched to.

use crate::error::Result;
use crate::json::parse_json_bytes;
use crate::router::Method;
use crate::types::Params;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONNECTION};
use hyper::HeaderMap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;

/// HTTP request handed to handlers
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request target exactly as received (path plus query)
    pub raw_url: String,
    /// Request path (without query string)
    pub path: String,
    /// Minor HTTP version: `0` for HTTP/1.0, `1` for HTTP/1.1
    pub http_minor: u8,
    /// Peer address, when known
    pub remote_addr: Option<SocketAddr>,
    /// Typed path captures of the matched route
    pub params: Params,
    /// Parsed query string
    query: QueryString,
    /// Request headers
    headers: HeaderMap,
    /// Request body
    body: Bytes,
}

impl Request {
    /// Create a new Request manually (for testing/internal use)
    ///
    /// Headers that are not valid HTTP tokens/values are skipped.
    pub fn new(
        method: Method,
        target: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                headers.append(n, v);
            }
        }
        Self::from_parts(method, target.into(), 1, headers, body.unwrap_or_default())
    }

    /// Assemble a request from parsed pieces
    #[must_use]
    pub fn from_parts(
        method: Method,
        raw_url: String,
        http_minor: u8,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        let (path, query) = match raw_url.split_once('?') {
            Some((p, q)) => (p.to_string(), QueryString::parse(q)),
            None => (raw_url.clone(), QueryString::default()),
        };

        Self {
            method,
            raw_url,
            path,
            http_minor,
            remote_addr: None,
            params: Params::default(),
            query,
            headers,
            body,
        }
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// All headers, duplicates preserved in arrival order
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Parsed query string
    #[must_use]
    pub const fn query(&self) -> &QueryString {
        &self.query
    }

    /// Query parameters as a `HashMap` (last value wins)
    #[must_use]
    pub fn query_map(&self) -> HashMap<String, String> {
        self.query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parse the request body as JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let mut bytes = self.body.to_vec();
        parse_json_bytes(&mut bytes)
    }

    /// Whether the client asked to keep the connection open
    ///
    /// HTTP/1.1 defaults to persistent unless a `Connection: close` token is
    /// present; HTTP/1.0 needs an explicit `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers
                .get_all(CONNECTION)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        if self.http_minor >= 1 {
            !has_token("close")
        } else {
            has_token("keep-alive")
        }
    }

    /// `HTTP/1.x` label for logs
    #[must_use]
    pub fn version_str(&self) -> &'static str {
        if self.http_minor >= 1 {
            "HTTP/1.1"
        } else {
            "HTTP/1.0"
        }
    }
}

/// Decoded `key=value` pairs of a query string, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    pairs: Vec<(String, String)>,
}

impl QueryString {
    /// Parse the part after `?`
    ///
    /// `+` decodes to a space and `%XX` to the byte it encodes; a key with no
    /// `=` gets an empty value.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (url_decode(key, true), url_decode(value, true))
            })
            .collect();
        Self { pairs }
    }

    /// First value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Values of `name[]=...` entries
    #[must_use]
    pub fn get_list(&self, name: &str) -> Vec<&str> {
        self.get_all(&format!("{name}[]"))
    }

    /// `(sub, value)` of `name[sub]=...` entries
    #[must_use]
    pub fn get_dict(&self, name: &str) -> Vec<(&str, &str)> {
        self.pairs
            .iter()
            .filter_map(|(k, v)| {
                let sub = k.strip_prefix(name)?.strip_prefix('[')?.strip_suffix(']')?;
                (!sub.is_empty()).then_some((sub, v.as_str()))
            })
            .collect()
    }

    /// Distinct keys in first-seen order
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.pairs {
            if !keys.contains(&k.as_str()) {
                keys.push(k.as_str());
            }
        }
        keys
    }

    /// Iterate over every pair
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the query string had no pairs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Percent-decode `s`; `+` becomes a space only when `plus_as_space`
///
/// Malformed escapes are kept verbatim and invalid UTF-8 is replaced.
pub(crate) fn url_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => out.push(b' '),
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
