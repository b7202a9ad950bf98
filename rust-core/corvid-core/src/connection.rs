//! # Connection Cycle
//!
//! Drives one client byte stream through
//! `read → parse → dispatch → write → (keep-alive | close)`.
//!
//! The connection is generic over the stream so the same loop serves a
//! `TcpStream` in production and an in-memory duplex pipe in tests.
//!
//! ## Closing
//!
//! The loop ends on idle timeout (silently), EOF, I/O error, a malformed
//! request, `Connection: close` from either side, keep-alive disabled in the
//! config, the per-connection request cap, a streamed body that failed
//! after its head was sent, or one whose length disagrees with its
//! `Content-Length`.

use crate::app::App;
use crate::error::{Error, Result};
use crate::parser::{ParseLimits, ParseStatus, RequestParser};
use crate::request::Request;
use crate::response::{Body, Response};
use crate::router::Method;
use crate::server::{MalformedRequestPolicy, ServerConfig};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, DATE, SERVER, TRANSFER_ENCODING};
use hyper::{HeaderMap, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Socket read size
const READ_BUF_SIZE: usize = 4096;

/// Piece size when writing a large fixed body
const WRITE_CHUNK_SIZE: usize = 16 * 1024;

/// How the body follows the head on the wire
enum Framing {
    /// Exact length already announced
    Fixed(Bytes),
    /// Raw stream bytes; `expected` is the announced length, if any
    Raw {
        chunks: BoxStream<'static, std::io::Result<Bytes>>,
        expected: Option<u64>,
    },
    /// `Transfer-Encoding: chunked`
    Chunked(BoxStream<'static, std::io::Result<Bytes>>),
}

/// One client connection
pub struct Connection<S> {
    stream: S,
    app: Arc<App>,
    config: Arc<ServerConfig>,
    parser: RequestParser,
    remote_addr: Option<SocketAddr>,
    served: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream
    pub fn new(stream: S, app: Arc<App>, config: Arc<ServerConfig>) -> Self {
        let parser = RequestParser::new(ParseLimits {
            max_head_size: config.max_head_size,
            max_headers: config.max_headers,
            max_body_size: config.max_body_size,
        });
        Self {
            stream,
            app,
            config,
            parser,
            remote_addr: None,
            served: 0,
        }
    }

    /// Record the peer address for requests and logs
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Serve requests until the connection closes
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when reading or writing the stream fails. The
    /// connection is finished either way.
    pub async fn run(mut self) -> Result<()> {
        let mut read_buf = vec![0u8; READ_BUF_SIZE];

        loop {
            match self.parser.poll() {
                Ok(ParseStatus::Complete(req)) => {
                    if !self.respond(req).await? {
                        break;
                    }
                    continue;
                }
                Ok(ParseStatus::ExpectContinue) => {
                    self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
                    self.stream.flush().await?;
                    continue;
                }
                Ok(ParseStatus::Invalid(e)) => {
                    debug!(remote = ?self.remote_addr, error = %e, "refusing request");
                    self.write_error(e.status()).await?;
                    break;
                }
                Err(e) => {
                    debug!(remote = ?self.remote_addr, error = %e, "malformed request");
                    if self.config.malformed_request == MalformedRequestPolicy::RespondBadRequest {
                        self.write_error(e.status()).await?;
                    }
                    break;
                }
                Ok(ParseStatus::Incomplete) => {}
            }

            let read = tokio::time::timeout(
                self.config.idle_timeout,
                self.stream.read(&mut read_buf),
            )
            .await;
            match read {
                Err(_) => {
                    debug!(
                        remote = ?self.remote_addr,
                        buffered = self.parser.buffered(),
                        "idle timeout"
                    );
                    break;
                }
                Ok(Ok(0)) => {
                    if !self.parser.is_idle() {
                        debug!(remote = ?self.remote_addr, "connection closed mid-request");
                    }
                    break;
                }
                Ok(Ok(n)) => self.parser.feed(&read_buf[..n]),
                Ok(Err(e)) => return Err(Error::Io(e)),
            }
        }

        // peer may already be gone
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Dispatch one request and write its response; `Ok(true)` keeps alive
    async fn respond(&mut self, mut req: Request) -> Result<bool> {
        self.served += 1;
        req.remote_addr = self.remote_addr;

        let method = req.method;
        let target = req.raw_url.clone();
        let version = req.version_str();
        let http_minor = req.http_minor;

        let cap = self.config.max_requests_per_connection;
        let mut keep_alive =
            self.config.keep_alive && req.keep_alive() && (cap == 0 || self.served < cap);

        let response = self.app.handle(req).await;
        if response.wants_close() {
            keep_alive = false;
        }

        info!(
            "    {} - \"{} {} {}\" {}",
            self.remote_addr
                .map_or_else(|| "-".to_string(), |a| a.to_string()),
            method,
            target,
            version,
            response.status.as_u16()
        );

        self.write_response(response, method == Method::Head, http_minor, keep_alive)
            .await
    }

    /// Answer a request that cannot be served and close
    async fn write_error(&mut self, status: StatusCode) -> Result<()> {
        let response = Response::error(status);
        self.write_response(response, false, 1, false).await?;
        Ok(())
    }

    /// Frame and send a response; returns whether the connection stays open
    async fn write_response(
        &mut self,
        response: Response,
        head_only: bool,
        http_minor: u8,
        mut keep_alive: bool,
    ) -> Result<bool> {
        let allows_body = response.allows_body();
        let Response {
            status,
            mut headers,
            body,
        } = response;

        headers.remove(TRANSFER_ENCODING);
        let framing = if allows_body {
            match body {
                Body::Empty => {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                    Framing::Fixed(Bytes::new())
                }
                Body::Full(bytes) => {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                    Framing::Fixed(bytes)
                }
                Body::Stream(chunks) => {
                    let expected = headers
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    if expected.is_some() {
                        Framing::Raw { chunks, expected }
                    } else if http_minor >= 1 {
                        headers.remove(CONTENT_LENGTH);
                        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                        Framing::Chunked(chunks)
                    } else {
                        // HTTP/1.0 without a length: the close ends the body
                        headers.remove(CONTENT_LENGTH);
                        keep_alive = false;
                        Framing::Raw {
                            chunks,
                            expected: None,
                        }
                    }
                }
            }
        } else {
            if status != StatusCode::NOT_MODIFIED {
                headers.remove(CONTENT_LENGTH);
            }
            Framing::Fixed(Bytes::new())
        };

        if keep_alive {
            if http_minor == 0 {
                headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
            }
        } else {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        if !headers.contains_key(SERVER) {
            if let Ok(name) = HeaderValue::from_str(&self.config.server_name) {
                headers.insert(SERVER, name);
            }
        }
        if !headers.contains_key(DATE) {
            if let Ok(date) = HeaderValue::from_str(&http_date()) {
                headers.insert(DATE, date);
            }
        }

        let mut out = Vec::with_capacity(256);
        encode_head(&mut out, status, &headers);

        if head_only || !allows_body {
            self.stream.write_all(&out).await?;
            self.stream.flush().await?;
            return Ok(keep_alive);
        }

        match framing {
            Framing::Fixed(bytes) if bytes.len() < self.config.stream_threshold => {
                out.extend_from_slice(&bytes);
                self.stream.write_all(&out).await?;
            }
            Framing::Fixed(bytes) => {
                self.stream.write_all(&out).await?;
                for piece in bytes.chunks(WRITE_CHUNK_SIZE) {
                    self.stream.write_all(piece).await?;
                }
            }
            Framing::Raw {
                mut chunks,
                expected,
            } => {
                self.stream.write_all(&out).await?;
                let mut sent: u64 = 0;
                while let Some(chunk) = chunks.next().await {
                    let mut chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(error = %e, "response body stream failed");
                            return Ok(false);
                        }
                    };
                    if let Some(expected) = expected {
                        let room = expected - sent;
                        if chunk.len() as u64 > room {
                            // stop at the announced length
                            chunk.truncate(usize::try_from(room).unwrap_or(usize::MAX));
                            self.stream.write_all(&chunk).await?;
                            warn!(expected, "streamed body longer than Content-Length");
                            self.stream.flush().await?;
                            return Ok(false);
                        }
                    }
                    self.stream.write_all(&chunk).await?;
                    sent += chunk.len() as u64;
                }
                if let Some(expected) = expected {
                    if sent != expected {
                        warn!(expected, sent, "streamed body length differs from Content-Length");
                        keep_alive = false;
                    }
                }
            }
            Framing::Chunked(mut chunks) => {
                self.stream.write_all(&out).await?;
                while let Some(chunk) = chunks.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(error = %e, "response body stream failed");
                            return Ok(false);
                        }
                    };
                    if chunk.is_empty() {
                        continue;
                    }
                    self.stream
                        .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                        .await?;
                    self.stream.write_all(&chunk).await?;
                    self.stream.write_all(b"\r\n").await?;
                }
                self.stream.write_all(b"0\r\n\r\n").await?;
            }
        }

        self.stream.flush().await?;
        Ok(keep_alive)
    }
}

/// Status line and headers, terminated by the blank line
fn encode_head(out: &mut Vec<u8>, status: StatusCode, headers: &HeaderMap) {
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        push_header_name(out, name.as_str());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// `content-length` → `Content-Length`
fn push_header_name(out: &mut Vec<u8>, name: &str) {
    let mut upper = true;
    for b in name.bytes() {
        out.push(if upper { b.to_ascii_uppercase() } else { b });
        upper = b == b'-';
    }
}

/// IMF-fixdate for the `Date` header
fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
