//! Lookup Service Integration Tests
//!
//! Runs the HTTP server on a loopback port and talks to it over raw TCP.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use url_lookup::server::{self, LookupService, ServerConfig};
use url_lookup::{CacheEngine, EngineConfig, Error};

struct Harness {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<url_lookup::Result<()>>,
    _cache: tempfile::TempDir,
}

async fn start(config_json: &str) -> Harness {
    let cache = tempfile::tempdir().unwrap();
    let cfg = tempfile::tempdir().unwrap();
    fs::write(cfg.path().join("urls.json"), config_json).unwrap();

    let engine = CacheEngine::new(EngineConfig::new(31, 100, cache.path())).unwrap();
    engine.bulk_load(cfg.path()).unwrap();

    let listener = server::bind(&ServerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
    })
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();

    let service = Arc::new(LookupService::new(Arc::new(engine)).unwrap());
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, service, shutdown.clone()));

    Harness {
        addr,
        shutdown,
        server,
        _cache: cache,
    }
}

async fn request(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        method, path
    );
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

const CONFIG: &str = r#"{"urls":[
    {"host":"www.cnn.com:80","path":"news","category":"news","safe":true},
    {"host":"malware.example:443","path":"dl/payload.exe?id=7","category":"malware","safe":false}
]}"#;

#[tokio::test]
async fn test_lookup_end_to_end() {
    let harness = start(CONFIG).await;

    let (status, body) = request(harness.addr, "GET", "/urlinfo/1/www.cnn.com:80/news").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"category":"news","safe":true}"#);

    let (status, body) = request(
        harness.addr,
        "GET",
        "/urlinfo/1/malware.example:443/dl/payload.exe?id=7",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"category":"malware","safe":false}"#);

    let (status, body) = request(harness.addr, "GET", "/urlinfo/1/www.cnn.com:80/sports").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"category":"Unknown","safe":false}"#);

    harness.shutdown.cancel();
    harness.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_health_metrics_and_errors() {
    let harness = start(CONFIG).await;

    let (status, body) = request(harness.addr, "GET", "/healthz").await;
    assert_eq!((status, body.as_str()), (200, "ok"));

    request(harness.addr, "GET", "/urlinfo/1/www.cnn.com:80/news").await;
    let (status, body) = request(harness.addr, "GET", "/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("url_lookup_cache_entries 2"));
    assert!(body.contains("url_lookup_requests_total{outcome=\"known\"} 1"));

    let (status, _) = request(harness.addr, "GET", "/urlinfo/1/nopath").await;
    assert_eq!(status, 404);

    let (status, _) = request(harness.addr, "DELETE", "/urlinfo/1/www.cnn.com:80/news").await;
    assert_eq!(status, 405);

    harness.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), harness.server)
        .await
        .expect("server should stop once cancelled")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let harness = start(CONFIG).await;

    let err = server::bind(&ServerConfig {
        addr: harness.addr,
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Bind { .. }));

    harness.shutdown.cancel();
}
