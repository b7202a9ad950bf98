//! # Request Parser
//!
//! Incremental HTTP/1.x request parser fed from a connection's reads.
//!
//! The head (request line and headers) is tokenized by `httparse` once it is
//! complete; body framing, limits and pipelining are handled here. Bytes
//! past the end of a request stay buffered and start the next one.
//!
//! Two kinds of failure are reported:
//! - `Err(..)` when the head itself cannot be tokenized. The connection is
//!   out of sync and no response can be tied to a request.
//! - [`ParseStatus::Invalid`] when the head was understood but the request is
//!   unacceptable (bad framing, missing `Host`, too large). A response can
//!   still be framed before closing.

use crate::error::{Error, Result};
use crate::request::Request;
use crate::router::Method;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, EXPECT, HOST, TRANSFER_ENCODING};
use hyper::HeaderMap;
use std::mem;
use tracing::trace;

/// Longest accepted chunk-size line
const MAX_CHUNK_LINE: usize = 1024;

/// Size limits applied while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Request line plus headers, in bytes
    pub max_head_size: usize,
    /// Number of header fields
    pub max_headers: usize,
    /// Decoded body, in bytes
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_head_size: 64 * 1024,
            max_headers: 64,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Outcome of [`RequestParser::poll`]
#[derive(Debug)]
pub enum ParseStatus {
    /// A full request was parsed
    Complete(Request),
    /// More bytes are needed
    Incomplete,
    /// The client waits for `100 Continue` before sending the body
    ExpectContinue,
    /// The head parsed but the request cannot be served
    Invalid(Error),
}

#[derive(Debug)]
enum ChunkPhase {
    Size,
    Data(usize),
    DataEnd,
    Trailers { seen: usize },
}

#[derive(Debug)]
enum Framing {
    Length(usize),
    Chunked(ChunkPhase),
}

#[derive(Debug)]
struct Pending {
    method: Method,
    target: String,
    http_minor: u8,
    headers: HeaderMap,
    framing: Framing,
    body: Vec<u8>,
    expect_continue: bool,
}

#[derive(Debug)]
enum State {
    Head,
    Body(Box<Pending>),
}

/// Incremental request parser
#[derive(Debug)]
pub struct RequestParser {
    limits: ParseLimits,
    buf: Vec<u8>,
    state: State,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParseLimits::default())
    }
}

impl RequestParser {
    /// Create a parser with the given limits
    #[must_use]
    pub const fn new(limits: ParseLimits) -> Self {
        Self {
            limits,
            buf: Vec::new(),
            state: State::Head,
        }
    }

    /// Append received bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a request
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the parser sits between requests with nothing buffered
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head) && self.buf.is_empty()
    }

    /// Try to make progress on the buffered bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedRequest` when the head cannot be tokenized
    /// and `Error::HeaderTooLarge` when it exceeds the head limits.
    pub fn poll(&mut self) -> Result<ParseStatus> {
        if matches!(self.state, State::Head) {
            let Some(pending) = self.parse_head()? else {
                return Ok(ParseStatus::Incomplete);
            };
            match pending {
                Ok(pending) => self.state = State::Body(Box::new(pending)),
                Err(e) => return Ok(ParseStatus::Invalid(e)),
            }
        }

        let State::Body(pending) = &mut self.state else {
            return Ok(ParseStatus::Incomplete);
        };

        let done = match read_body(&mut self.buf, pending, &self.limits) {
            Ok(done) => done,
            Err(e) => return Ok(ParseStatus::Invalid(e)),
        };
        if !done {
            if pending.expect_continue {
                pending.expect_continue = false;
                return Ok(ParseStatus::ExpectContinue);
            }
            return Ok(ParseStatus::Incomplete);
        }

        let State::Body(pending) = mem::replace(&mut self.state, State::Head) else {
            return Ok(ParseStatus::Incomplete);
        };
        let Pending {
            method,
            target,
            http_minor,
            headers,
            body,
            ..
        } = *pending;
        trace!(%method, target, body = body.len(), "request parsed");
        Ok(ParseStatus::Complete(Request::from_parts(
            method,
            target,
            http_minor,
            headers,
            Bytes::from(body),
        )))
    }

    /// Tokenize the head once it is complete
    ///
    /// The inner `Err` marks a request that parsed but must be refused.
    fn parse_head(&mut self) -> Result<Option<std::result::Result<Pending, Error>>> {
        let blank = self
            .buf
            .iter()
            .take_while(|b| matches!(b, b'\r' | b'\n'))
            .count();
        self.buf.drain(..blank);
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut slots = vec![httparse::EMPTY_HEADER; self.limits.max_headers];
        let mut req = httparse::Request::new(&mut slots);
        let head_len = match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) if n <= self.limits.max_head_size => n,
            Ok(httparse::Status::Complete(_)) | Err(httparse::Error::TooManyHeaders) => {
                return Err(Error::HeaderTooLarge {
                    limit: self.limits.max_head_size,
                });
            }
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.limits.max_head_size {
                    return Err(Error::HeaderTooLarge {
                        limit: self.limits.max_head_size,
                    });
                }
                return Ok(None);
            }
            Err(e) => return Err(Error::malformed(e.to_string())),
        };

        let token = req.method.unwrap_or_default().to_string();
        let target = req.path.unwrap_or_default().to_string();
        let http_minor = req.version.unwrap_or(1);
        let mut headers = HeaderMap::with_capacity(req.headers.len());
        for h in req.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|_| Error::malformed(format!("invalid header name {}", h.name)))?;
            let value = HeaderValue::from_bytes(h.value)
                .map_err(|_| Error::malformed(format!("invalid value for header {}", h.name)))?;
            headers.append(name, value);
        }
        self.buf.drain(..head_len);

        Ok(Some(self.classify(token, target, http_minor, headers)))
    }

    fn classify(
        &self,
        token: String,
        target: String,
        http_minor: u8,
        headers: HeaderMap,
    ) -> std::result::Result<Pending, Error> {
        let method = Method::parse(&token).ok_or(Error::UnsupportedMethod { method: token })?;

        if http_minor >= 1 && !headers.contains_key(HOST) {
            return Err(Error::malformed("HTTP/1.1 request without Host header"));
        }

        let framing = body_framing(&headers)?;
        if let Framing::Length(len) = framing {
            if len > self.limits.max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: self.limits.max_body_size,
                    actual: len,
                });
            }
        }

        let has_body = !matches!(framing, Framing::Length(0));
        let expect_continue = http_minor >= 1
            && has_body
            && headers
                .get(EXPECT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"));

        Ok(Pending {
            method,
            target,
            http_minor,
            headers,
            framing,
            body: Vec::new(),
            expect_continue,
        })
    }
}

/// Decide how the body is delimited
fn body_framing(headers: &HeaderMap) -> Result<Framing> {
    let chunked = match headers.get_all(TRANSFER_ENCODING).iter().last() {
        None => false,
        Some(value) => {
            let last = value
                .to_str()
                .ok()
                .and_then(|v| v.rsplit(',').next())
                .map(str::trim);
            if !last.is_some_and(|c| c.eq_ignore_ascii_case("chunked")) {
                return Err(Error::malformed("unsupported transfer coding"));
            }
            true
        }
    };

    let mut length: Option<usize> = None;
    for value in &headers.get_all(CONTENT_LENGTH) {
        for part in value.as_bytes().split(|b| *b == b',') {
            let part = trim_ows(part);
            if part.is_empty() || !part.iter().all(u8::is_ascii_digit) {
                return Err(Error::malformed("invalid Content-Length"));
            }
            let parsed = std::str::from_utf8(part)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| Error::malformed("Content-Length out of range"))?;
            if length.is_some_and(|l| l != parsed) {
                return Err(Error::malformed("conflicting Content-Length values"));
            }
            length = Some(parsed);
        }
    }

    match (chunked, length) {
        (true, Some(_)) => Err(Error::malformed(
            "both Transfer-Encoding and Content-Length present",
        )),
        (true, None) => Ok(Framing::Chunked(ChunkPhase::Size)),
        (false, len) => Ok(Framing::Length(len.unwrap_or(0))),
    }
}

/// Move body bytes from `buf` into `pending`; `Ok(true)` once complete
fn read_body(buf: &mut Vec<u8>, pending: &mut Pending, limits: &ParseLimits) -> Result<bool> {
    match &mut pending.framing {
        Framing::Length(len) => {
            let want = *len - pending.body.len();
            let take = want.min(buf.len());
            pending.body.extend(buf.drain(..take));
            Ok(pending.body.len() == *len)
        }
        Framing::Chunked(phase) => read_chunked(buf, phase, &mut pending.body, limits),
    }
}

fn read_chunked(
    buf: &mut Vec<u8>,
    phase: &mut ChunkPhase,
    body: &mut Vec<u8>,
    limits: &ParseLimits,
) -> Result<bool> {
    loop {
        match phase {
            ChunkPhase::Size => {
                let Some(line) = take_line(buf, MAX_CHUNK_LINE)? else {
                    return Ok(false);
                };
                let size = parse_chunk_size(&line)?;
                let total = body.len().checked_add(size);
                if total.map_or(true, |total| total > limits.max_body_size) {
                    return Err(Error::PayloadTooLarge {
                        limit: limits.max_body_size,
                        actual: body.len().saturating_add(size),
                    });
                }
                *phase = if size == 0 {
                    ChunkPhase::Trailers { seen: 0 }
                } else {
                    ChunkPhase::Data(size)
                };
            }
            ChunkPhase::Data(remaining) => {
                let take = (*remaining).min(buf.len());
                body.extend(buf.drain(..take));
                *remaining -= take;
                if *remaining > 0 {
                    return Ok(false);
                }
                *phase = ChunkPhase::DataEnd;
            }
            ChunkPhase::DataEnd => {
                if buf.len() < 2 {
                    return Ok(false);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(Error::malformed("chunk data not followed by CRLF"));
                }
                buf.drain(..2);
                *phase = ChunkPhase::Size;
            }
            ChunkPhase::Trailers { seen } => {
                let Some(line) = take_line(buf, limits.max_head_size)? else {
                    return Ok(false);
                };
                if line.is_empty() {
                    return Ok(true);
                }
                *seen += line.len() + 2;
                if *seen > limits.max_head_size {
                    return Err(Error::HeaderTooLarge {
                        limit: limits.max_head_size,
                    });
                }
            }
        }
    }
}

/// Remove one CRLF-terminated line from the front of `buf`
fn take_line(buf: &mut Vec<u8>, max: usize) -> Result<Option<Vec<u8>>> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf[..pos].to_vec();
            buf.drain(..pos + 2);
            Ok(Some(line))
        }
        None if buf.len() > max => Err(Error::malformed("line too long in chunked body")),
        None => Ok(None),
    }
}

/// Strip optional whitespace around a header or chunk-size token
fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let size = line
        .split(|b| *b == b';')
        .next()
        .unwrap_or_default();
    let size = trim_ows(size);
    if size.is_empty() || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::malformed("invalid chunk size"));
    }
    std::str::from_utf8(size)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::malformed("chunk size out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn parse_one(raw: &[u8]) -> ParseStatus {
        let mut parser = RequestParser::default();
        parser.feed(raw);
        parser.poll().unwrap()
    }

    fn complete(status: ParseStatus) -> Request {
        match status {
            ParseStatus::Complete(req) => req,
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    fn invalid(status: ParseStatus) -> Error {
        match status {
            ParseStatus::Invalid(e) => e,
            other => panic!("expected invalid request, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_get() {
        let req = complete(parse_one(b"GET /hello/3?x=1 HTTP/1.1\r\nHost: a\r\n\r\n"));
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/hello/3");
        assert_eq!(req.query().get("x"), Some("1"));
        assert_eq!(req.http_minor, 1);
        assert_eq!(req.header("host"), Some("a"));
    }

    #[test]
    fn test_incremental_head() {
        let mut parser = RequestParser::default();
        parser.feed(b"GET / HTTP/1.1\r\nHo");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Incomplete));
        parser.feed(b"st: a\r\n\r\n");
        complete(parser.poll().unwrap());
        assert!(parser.is_idle());
    }

    #[test]
    fn test_skips_leading_blank_lines() {
        let req = complete(parse_one(b"\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n"));
        assert_eq!(req.path, "/");
    }

    #[test]
    fn test_pipelined_requests_stay_buffered() {
        let mut parser = RequestParser::default();
        parser.feed(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(complete(parser.poll().unwrap()).path, "/a");
        assert!(parser.buffered() > 0);
        assert_eq!(complete(parser.poll().unwrap()).path, "/b");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Incomplete));
    }

    #[test]
    fn test_content_length_body_across_feeds() {
        let mut parser = RequestParser::default();
        parser.feed(b"POST /add_json HTTP/1.1\r\nHost: x\r\nContent-Length: 13\r\n\r\n{\"a\":1,");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Incomplete));
        parser.feed(b"\"b\":2}GET");
        let req = complete(parser.poll().unwrap());
        assert_eq!(req.body_str(), Some(r#"{"a":1,"b":2}"#));
        assert_eq!(parser.buffered(), 3);
    }

    #[test]
    fn test_chunked_body() {
        let req = complete(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n",
        ));
        assert_eq!(req.body_str(), Some("hello world"));
    }

    #[test]
    fn test_chunked_body_byte_by_byte() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let mut parser = RequestParser::default();
        let mut result = None;
        for byte in raw {
            parser.feed(&[*byte]);
            if let ParseStatus::Complete(req) = parser.poll().unwrap() {
                result = Some(req);
            }
        }
        assert_eq!(result.unwrap().body_str(), Some("abc"));
    }

    #[test]
    fn test_bad_chunk_size_is_invalid() {
        let err = invalid(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_conflicting_framing_is_invalid() {
        let err = invalid(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\nabc",
        ));
        assert!(matches!(err, Error::MalformedRequest { .. }));

        let err = invalid(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\nabcd",
        ));
        assert!(matches!(err, Error::MalformedRequest { .. }));

        let err = invalid(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: +3\r\n\r\nabc",
        ));
        assert!(matches!(err, Error::MalformedRequest { .. }));
    }

    #[test]
    fn test_repeated_equal_content_length_is_accepted() {
        let req = complete(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc",
        ));
        assert_eq!(req.body_bytes(), b"abc");
    }

    #[test]
    fn test_missing_host() {
        let err = invalid(parse_one(b"GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let req = complete(parse_one(b"GET / HTTP/1.0\r\n\r\n"));
        assert_eq!(req.http_minor, 0);
    }

    #[test]
    fn test_unknown_method() {
        let err = invalid(parse_one(b"BREW /pot HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn test_body_too_large() {
        let mut parser = RequestParser::new(ParseLimits {
            max_body_size: 4,
            ..ParseLimits::default()
        });
        parser.feed(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\n");
        let err = invalid(parser.poll().unwrap());
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_chunked_body_too_large() {
        let mut parser = RequestParser::new(ParseLimits {
            max_body_size: 8,
            ..ParseLimits::default()
        });
        parser.feed(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n");
        parser.feed(b"5\r\nhello\r\n");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Incomplete));
        parser.feed(b"4\r\n");
        let err = invalid(parser.poll().unwrap());
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_chunk_size_overflowing_body_length() {
        let mut parser = RequestParser::new(ParseLimits {
            max_body_size: 16,
            ..ParseLimits::default()
        });
        parser.feed(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              1\r\na\r\nffffffffffffffff\r\n",
        );
        let err = invalid(parser.poll().unwrap());
        assert!(matches!(
            err,
            Error::PayloadTooLarge {
                limit: 16,
                actual: usize::MAX
            }
        ));
    }

    #[test]
    fn test_single_huge_chunk_refused() {
        let err = invalid(parse_one(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              ffffffffffffffff\r\n",
        ));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_head_too_large() {
        let mut parser = RequestParser::new(ParseLimits {
            max_head_size: 32,
            ..ParseLimits::default()
        });
        parser.feed(b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let err = parser.poll().unwrap_err();
        assert!(matches!(err, Error::HeaderTooLarge { .. }));
    }

    #[test]
    fn test_too_many_headers() {
        let mut parser = RequestParser::new(ParseLimits {
            max_headers: 1,
            ..ParseLimits::default()
        });
        parser.feed(b"GET / HTTP/1.1\r\nHost: x\r\nA: b\r\n\r\n");
        assert!(matches!(parser.poll(), Err(Error::HeaderTooLarge { .. })));
    }

    #[test]
    fn test_garbage_is_error() {
        let mut parser = RequestParser::default();
        parser.feed(b"\x01\x02 nonsense\r\n\r\n");
        assert!(matches!(parser.poll(), Err(Error::MalformedRequest { .. })));
    }

    #[test]
    fn test_expect_continue() {
        let mut parser = RequestParser::default();
        parser.feed(b"POST / HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n");
        assert!(matches!(parser.poll().unwrap(), ParseStatus::ExpectContinue));
        assert!(matches!(parser.poll().unwrap(), ParseStatus::Incomplete));
        parser.feed(b"ok");
        assert_eq!(complete(parser.poll().unwrap()).body_bytes(), b"ok");
    }
}
