//! Lookup Service - HTTP front end
//!
//! ```text
//! GET /urlinfo/1/{host-and-port}/{path-and-query}  → {"category": .., "safe": ..}
//! GET /healthz | /livez | /readyz                  → ok
//! GET /metrics                                     → Prometheus text format
//! ```
//!
//! Unknown URLs are answered with the unknown sentinel and a 200; a lookup
//! never signals absence through the status code.

mod metrics;

pub use metrics::{LookupOutcome, ServiceMetrics};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEngine, UrlKey};
use crate::error::{Error, Result};

/// Route prefix for lookups
pub const LOOKUP_PREFIX: &str = "/urlinfo/1/";

/// Default listening port
pub const DEFAULT_PORT: u16 = 16888;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

// =============================================================================
// Configuration
// =============================================================================

/// Lookup server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}

impl ServerConfig {
    /// Listen on all interfaces at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}

// =============================================================================
// Request Handling
// =============================================================================

/// Extract the lookup key from a request path and query.
///
/// The host segment ends at the first `/` after the prefix; everything after
/// it, plus `?query` when present, is the original path-and-query. Both are
/// percent-decoded; escapes that are not valid UTF-8 decode to U+FFFD.
pub fn parse_lookup_path(path: &str, query: Option<&str>) -> Option<UrlKey> {
    let rest = path.strip_prefix(LOOKUP_PREFIX)?;
    let (host, original) = rest.split_once('/')?;
    if host.is_empty() {
        return None;
    }

    let original = match query {
        Some(query) => decode(&format!("{}?{}", original, query)),
        None => decode(original),
    };

    Some(UrlKey::new(decode(host), original))
}

fn decode(segment: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
}

/// HTTP request handler over a shared cache engine
pub struct LookupService {
    engine: Arc<CacheEngine>,
    metrics: ServiceMetrics,
}

impl LookupService {
    pub fn new(engine: Arc<CacheEngine>) -> Result<Self> {
        Ok(Self {
            engine,
            metrics: ServiceMetrics::new()?,
        })
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Route and answer one request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        // Requests carry no body worth reading
        let (parts, body) = req.into_parts();
        drop(body);
        let path = parts.uri.path();

        if path.starts_with(LOOKUP_PREFIX) {
            if parts.method != Method::GET {
                return respond(StatusCode::METHOD_NOT_ALLOWED, TEXT, "method not allowed");
            }
            return match parse_lookup_path(path, parts.uri.query()) {
                Some(key) => self.lookup(key).await,
                None => respond(StatusCode::NOT_FOUND, TEXT, "not found"),
            };
        }

        match (&parts.method, path) {
            (&Method::GET, "/healthz" | "/livez" | "/readyz") => {
                respond(StatusCode::OK, TEXT, "ok")
            }
            (&Method::GET, "/metrics") => self.render_metrics(),
            _ => respond(StatusCode::NOT_FOUND, TEXT, "not found"),
        }
    }

    async fn lookup(&self, key: UrlKey) -> Response<Full<Bytes>> {
        debug!("Look up url {}", key);
        let engine = Arc::clone(&self.engine);
        let info = match tokio::task::spawn_blocking(move || engine.get(&key)).await {
            Ok(info) => info,
            Err(e) => {
                error!("Lookup task failed: {}", e);
                self.metrics.record_request(LookupOutcome::Error);
                return respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, "Internal error");
            }
        };

        match serde_json::to_vec(&info) {
            Ok(body) => {
                self.metrics.record_request(if info.is_unknown() {
                    LookupOutcome::Unknown
                } else {
                    LookupOutcome::Known
                });
                respond(StatusCode::OK, JSON, body)
            }
            Err(e) => {
                error!("Failed to write entry: {}", e);
                self.metrics.record_request(LookupOutcome::Error);
                respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, "Internal error")
            }
        }
    }

    fn render_metrics(&self) -> Response<Full<Bytes>> {
        self.metrics.observe(&self.engine.stats());
        match self.metrics.encode() {
            Ok(buffer) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, buffer),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT, "Internal error")
            }
        }
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

// =============================================================================
// Server
// =============================================================================

/// Bind the listener. Failure here is fatal to startup.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|e| Error::Bind {
            addr: config.addr,
            source: e,
        })?;
    info!("Lookup server listening on {}", config.addr);
    Ok(listener)
}

/// Accept connections until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    service: Arc<LookupService>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Start serving ...");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Lookup server accept error: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let service = Arc::clone(&service);

        tokio::spawn(async move {
            let handler = service_fn(move |req| {
                let service = Arc::clone(&service);
                async move { Ok::<_, Infallible>(service.handle(req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                debug!("Connection from {} ended: {}", peer, e);
            }
        });
    }

    info!("Lookup server stopped");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
