//! # HTTP Server
//!
//! Accept loop over Tokio with one task per connection.
//!
//! ## Key Features
//!
//! - Bounded connection pool (excess connections get a 503)
//! - Graceful shutdown on Ctrl+C, draining open connections
//! - Keep-alive with an idle timeout
//! - Route table frozen and shared read-only once serving starts

use crate::app::App;
use crate::blueprint::Blueprint;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handler::IntoHandler;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::router::{HandlerId, Method};
pub use hyper::body::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// What to do with a request whose head cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedRequestPolicy {
    /// Close the connection without writing anything
    #[default]
    Drop,
    /// Answer `400 Bad Request` (or `431`) and close
    RespondBadRequest,
}

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Close a connection after this long without receiving a byte
    pub idle_timeout: Duration,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Connections served at once
    pub max_connections: usize,
    /// Requests per connection before it is closed, `0` for no cap
    pub max_requests_per_connection: usize,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// Max request line plus headers in bytes
    pub max_head_size: usize,
    /// Max number of request headers
    pub max_headers: usize,
    /// Fixed bodies at least this large are written apart from the head
    pub stream_threshold: usize,
    /// `Server` response header
    pub server_name: String,
    /// Handling of unparseable requests
    pub malformed_request: MalformedRequestPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 18080).into(),
            keep_alive: true,
            idle_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            max_connections: 1024,
            max_requests_per_connection: 0,
            max_body_size: 1024 * 1024,
            max_head_size: 64 * 1024,
            max_headers: 64,
            stream_threshold: 1024 * 1024,
            server_name: "corvid".to_string(),
            malformed_request: MalformedRequestPolicy::Drop,
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    #[must_use]
    pub const fn address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Enable or disable keep-alive
    #[must_use]
    pub const fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the graceful shutdown window
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the connection limit
    #[must_use]
    pub const fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Cap requests per connection (`0` disables the cap)
    #[must_use]
    pub const fn max_requests_per_connection(mut self, max: usize) -> Self {
        self.max_requests_per_connection = max;
        self
    }

    /// Set max request body size
    #[must_use]
    pub const fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Set max request head size
    #[must_use]
    pub const fn max_head_size(mut self, bytes: usize) -> Self {
        self.max_head_size = bytes;
        self
    }

    /// Set max header count
    #[must_use]
    pub const fn max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    /// Set the size from which fixed bodies are written separately
    #[must_use]
    pub const fn stream_threshold(mut self, bytes: usize) -> Self {
        self.stream_threshold = bytes;
        self
    }

    /// Set the `Server` header value
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Choose how unparseable requests are handled
    #[must_use]
    pub const fn malformed_request(mut self, policy: MalformedRequestPolicy) -> Self {
        self.malformed_request = policy;
        self
    }
}

/// HTTP server: configuration plus the application it serves
#[derive(Debug, Default)]
pub struct Server {
    config: ServerConfig,
    app: App,
}

impl Server {
    /// Create a new Server instance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server with an explicit configuration
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            app: App::new(),
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Mutable configuration
    pub fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    /// The application being served
    #[must_use]
    pub const fn app(&self) -> &App {
        &self.app
    }

    /// Mutable application, for registration
    pub fn app_mut(&mut self) -> &mut App {
        &mut self.app
    }

    /// Add a middleware to the chain
    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.app.add_middleware(middleware);
    }

    /// Add a route and its handler
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn route<H, Args>(&mut self, methods: &[Method], pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.app.route(methods, pattern, handler)
    }

    /// Add a GET route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn get<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.app.get(pattern, handler)
    }

    /// Add a POST route
    ///
    /// # Errors
    ///
    /// See [`App::route`].
    pub fn post<H, Args>(&mut self, pattern: &str, handler: H) -> Result<HandlerId>
    where
        H: IntoHandler<Args>,
    {
        self.app.post(pattern, handler)
    }

    /// Set the catch-all handler
    ///
    /// # Errors
    ///
    /// See [`App::catchall`].
    pub fn catchall<H, Args>(&mut self, handler: H) -> Result<()>
    where
        H: IntoHandler<Args>,
    {
        self.app.catchall(handler)
    }

    /// Mount a blueprint
    ///
    /// # Errors
    ///
    /// See [`App::register_blueprint`].
    pub fn register_blueprint(&mut self, blueprint: Blueprint) -> Result<()> {
        self.app.register_blueprint(blueprint)
    }

    /// Name a registered route
    ///
    /// # Errors
    ///
    /// See [`App::name_route`].
    pub fn name_route(&mut self, id: HandlerId, name: &str) -> Result<()> {
        self.app.name_route(id, name)
    }

    /// Bind the configured address and serve until Ctrl+C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound.
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.address;
        let listener = bind_listener(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;

        info!("Server listening on http://{}", addr);
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `signal` completes
    ///
    /// Open connections then get up to `shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged and
    /// skipped.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self { config, app } = self;
        app.router().log_routes();

        let app = Arc::new(app);
        let config = Arc::new(config);
        let max_connections = config.max_connections.max(1);
        let permits = Arc::new(Semaphore::new(max_connections));

        tokio::pin!(signal);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (mut stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        warn!(%remote_addr, max_connections, "connection limit reached");
                        tokio::spawn(async move {
                            let _ = stream
                                .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                                .await;
                            let _ = stream.shutdown().await;
                        });
                        continue;
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "set_nodelay failed");
                    }
                    debug!(%remote_addr, "connection opened");

                    let connection = Connection::new(stream, Arc::clone(&app), Arc::clone(&config))
                        .with_remote_addr(remote_addr);
                    tokio::spawn(async move {
                        if let Err(err) = connection.run().await {
                            debug!(%remote_addr, error = %err, "connection ended with error");
                        }
                        debug!(%remote_addr, "connection closed");
                        drop(permit);
                    });
                }
                () = &mut signal => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }
        drop(listener);

        let drain = async {
            while permits.available_permits() < max_connections {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
            warn!(
                open = max_connections - permits.available_permits(),
                "shutdown timeout elapsed with connections still open"
            );
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(
        &self,
        method: Method,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        if let Some(b) = body.as_ref() {
            if b.len() > self.config.max_body_size {
                return Response::error(hyper::StatusCode::PAYLOAD_TOO_LARGE);
            }
        }
        let req = Request::new(method, path, headers, body);
        self.app.handle(req).await
    }
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use hyper::StatusCode;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    const LARGE: usize = 1024 * 1024;

    fn demo_server(config: ServerConfig) -> Server {
        let mut server = Server::with_config(config);
        server.get("/", || "Hello World!").unwrap();
        server.get("/about", || "About Corvid example.").unwrap();
        server
            .get("/hello/<int>", |count: i64| {
                if count > 100 {
                    return Response::new(StatusCode::BAD_REQUEST);
                }
                Response::text(format!("{count} bottles of beer!"))
            })
            .unwrap();
        server
            .get("/add/<int>/<int>", |a: i64, b: i64| (a + b).to_string())
            .unwrap();
        server
            .get("/large", || {
                let piece = Bytes::from(vec![b'x'; 64 * 1024]);
                Response::stream(stream::iter(
                    std::iter::repeat(piece).take(LARGE / (64 * 1024)).map(Ok),
                ))
            })
            .unwrap();
        server
    }

    async fn start(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = demo_server(config);
        let handle = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 18080);
        assert!(config.keep_alive);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.malformed_request, MalformedRequestPolicy::Drop);
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::default()
            .max_connections(8)
            .max_body_size(10)
            .server_name("test");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_body_size, 10);
        assert_eq!(config.server_name, "test");
    }

    #[tokio::test]
    async fn test_request_without_network() {
        let server = demo_server(ServerConfig::default());
        let res = server
            .test_request(Method::Get, "/add/1/2", HashMap::new(), None)
            .await;
        assert_eq!(res.body_bytes(), Some(&b"3"[..]));

        let res = server
            .test_request(Method::Get, "/list", HashMap::new(), None)
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_body_limit() {
        let server = demo_server(ServerConfig::default().max_body_size(2));
        let res = server
            .test_request(Method::Get, "/", HashMap::new(), Some(Bytes::from_static(b"abc")))
            .await;
        assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_persistent_connection() {
        let (addr, tx, handle) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = vec![0u8; 1024];
        for _ in 0..10 {
            stream
                .write_all(b"GET / HTTP/1.1\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let n = stream.read(&mut buf).await.unwrap();
            let text = String::from_utf8_lossy(&buf[..n]);
            assert!(text.contains("Hello World!"), "got {text}");
        }

        drop(stream);
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_large_response() {
        let (addr, tx, handle) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /large HTTP/1.1\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let raw = read_until_close(&mut stream).await;
        assert!(raw.len() > 512 * 1024);

        let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&raw[..split]).to_string();
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(raw.ends_with(b"0\r\n\r\n"));

        let mut rest = &raw[split + 4..];
        let mut total = 0;
        loop {
            let line_end = rest.windows(2).position(|w| w == b"\r\n").unwrap();
            let size =
                usize::from_str_radix(std::str::from_utf8(&rest[..line_end]).unwrap(), 16).unwrap();
            rest = &rest[line_end + 2..];
            if size == 0 {
                break;
            }
            assert!(rest[..size].iter().all(|b| *b == b'x'));
            total += size;
            rest = &rest[size + 2..];
        }
        assert_eq!(total, LARGE);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_is_closed_silently() {
        let (addr, tx, handle) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\nhHhHHefhwjkefhklwejfklwejf\n")
            .await
            .unwrap();

        let out = tokio::time::timeout(Duration::from_secs(10), read_until_close(&mut stream))
            .await
            .unwrap();
        assert!(out.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_codes_over_tcp() {
        let (addr, tx, handle) = start(ServerConfig::default()).await;

        for (path, status) in [
            ("/about", "200"),
            ("/list", "404"),
            ("/hello/3", "200"),
            ("/hello/500", "400"),
        ] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();
            let text = String::from_utf8(read_until_close(&mut stream).await).unwrap();
            assert!(
                text.starts_with(&format!("HTTP/1.1 {status} ")),
                "{path}: {text}"
            );
        }

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (addr, tx, handle) = start(ServerConfig::default().max_connections(1)).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = first.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("Hello World!"));

        let mut second = TcpStream::connect(addr).await.unwrap();
        let text = String::from_utf8(read_until_close(&mut second).await).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 "));

        drop(first);
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_drain_timeout() {
        let config = ServerConfig::default()
            .idle_timeout(Duration::from_secs(60))
            .shutdown_timeout(Duration::from_millis(100));
        let (addr, tx, handle) = start(config).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let _ = idle.read(&mut buf).await.unwrap();

        tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.is_ok(), "serve should return after the shutdown timeout");
    }
}
