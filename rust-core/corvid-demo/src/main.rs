//! Corvid example application
//!
//! Serves a handful of demo routes on `127.0.0.1:18080`, or on the address
//! given in `CORVID_ADDR`.

use anyhow::Context;
use corvid_core::{
    Blueprint, Bytes, Handler, Json, LoggingMiddleware, Method, Request, Response, Server, ServerConfig,
    StatusCode,
};
use futures_util::stream;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LARGE_BODY: usize = 1024 * 1024;
const LARGE_PIECE: usize = 64 * 1024;
/// Log filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "corvid_demo=info,corvid_core=info";

#[derive(Debug, Deserialize)]
struct Operands {
    a: i64,
    b: i64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
}

fn config() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default()
        .idle_timeout(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(10));
    if let Ok(addr) = std::env::var("CORVID_ADDR") {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid CORVID_ADDR: {addr}"))?;
        config = config.address(addr);
    }
    Ok(config)
}

fn routes(server: &mut Server) -> corvid_core::Result<()> {
    server.get("/", || "Hello World!")?;
    let about = server.get("/about", || "About Corvid example.")?;
    server.name_route(about, "about")?;
    // Requesting "/path" redirects here.
    server.get("/path/", || "Trailing slash test case..")?;

    server.get("/json", || {
        Json(serde_json::json!({
            "message": "Hello, World!",
            "framework": "corvid",
        }))
    })?;

    server.get("/hello/<int>", |count: i64| {
        if count > 100 {
            return Response::new(StatusCode::BAD_REQUEST);
        }
        Response::text(format!("{count} bottles of beer!"))
    })?;

    server.get("/add/<int>/<int>", |a: i64, b: i64| (a + b).to_string())?;

    server.post("/add_json", |req: &Request| -> anyhow::Result<String> {
        let ops: Operands = req.json()?;
        Ok((ops.a + ops.b).to_string())
    })?;

    server.get("/params", |req: &Request| {
        let mut out = String::from("Params:\n");
        for (key, value) in req.query().iter() {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out
    })?;

    server.get("/large", || {
        let piece = Bytes::from(vec![b'x'; LARGE_PIECE]);
        Response::stream(stream::iter(
            std::iter::repeat(piece).take(LARGE_BODY / LARGE_PIECE).map(Ok),
        ))
    })?;

    server.get("/path_test/<path>", |rest: String| format!("path: {rest}"))?;

    server.route(
        &[Method::Get],
        "/delay/<uint>",
        Handler::from_async(|_req, params| async move {
            let ms = params.uint(0).unwrap_or(0).min(2_000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            format!("slept {ms}ms")
        }),
    )?;

    let mut v1 = Blueprint::new("v1");
    v1.get("/status", || Json(serde_json::json!({ "status": "ok" })));
    let mut api = Blueprint::new("api");
    api.get("/echo/<string>", |word: String| word)
        .catchall(|code: u64| Json(serde_json::json!({ "error": code })));
    api.register_blueprint(v1)?;
    server.register_blueprint(api)?;

    server.catchall(|code: u64| {
        let status = StatusCode::from_u16(u16::try_from(code).unwrap_or(500))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Response::text(format!("{code} {}", status.canonical_reason().unwrap_or("")))
            .with_status(status)
    })?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut server = Server::with_config(config()?);
    server.add_middleware(LoggingMiddleware::new());
    routes(&mut server)?;

    info!(address = %server.config().address, "corvid demo starting");
    server.serve().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_this_binary() {
        let target = env!("CARGO_CRATE_NAME");
        assert!(DEFAULT_FILTER.split(',').any(|d| d.starts_with(&format!("{target}="))));
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_routes_register() {
        let mut server = Server::new();
        routes(&mut server).unwrap();
        let about = server.app().router().route_by_name("about").unwrap();
        assert_eq!(about.path_pattern, "/about");
    }
}
