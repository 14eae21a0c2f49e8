//! URL Lookup Service
//!
//! Serves URL safety lookups from a sharded cache that spills to disk.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       URL Lookup Service                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐     │
//! │  │    Config    │───▶│    Cache     │◀───│    Lookup    │     │
//! │  │   Watcher    │    │    Engine    │    │   Service    │     │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘     │
//! │                             ▼                                  │
//! │                      bucket<N>.json                            │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use url_lookup::cache::{CacheEngine, EngineConfig, DEFAULT_CAPACITY, DEFAULT_SHARD_COUNT};
use url_lookup::error::{Error, Result};
use url_lookup::server::{self, LookupService, ServerConfig, DEFAULT_PORT};
use url_lookup::watcher::{ConfigWatcher, WatcherConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// URL Lookup - answers whether a URL is safe to visit
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "URL_LOOKUP_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory of URL configuration files, loaded at startup and watched
    #[arg(long, env = "URL_CONFIG_PATH")]
    url_config_path: PathBuf,

    /// Directory holding spilled shard files
    #[arg(long, env = "URL_CACHE_PATH")]
    url_cache_path: PathBuf,

    /// Number of cache shards
    #[arg(long, env = "URL_SHARD_COUNT", default_value_t = DEFAULT_SHARD_COUNT)]
    shard_count: usize,

    /// Maximum URLs held in memory
    #[arg(long, env = "URL_MAX_CACHED", default_value_t = DEFAULT_CAPACITY)]
    max_cached_urls: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    require_dir("url config path", &args.url_config_path)?;
    require_dir("url cache path", &args.url_cache_path)?;

    info!("Starting URL lookup service");
    info!("  Config path: {}", args.url_config_path.display());
    info!("  Cache path: {}", args.url_cache_path.display());
    info!("  Shards: {}", args.shard_count);
    info!("  Max cached urls: {}", args.max_cached_urls);

    let engine_config = EngineConfig::new(
        args.shard_count,
        args.max_cached_urls,
        args.url_cache_path.clone(),
    );
    let engine = Arc::new(CacheEngine::new(engine_config)?);

    // Bind before loading so a taken port fails fast
    let listener = server::bind(&ServerConfig::with_port(args.port)).await?;

    let loader = Arc::clone(&engine);
    let config_dir = args.url_config_path.clone();
    tokio::task::spawn_blocking(move || loader.bulk_load(&config_dir))
        .await
        .map_err(|e| Error::Internal(format!("Bulk load task failed: {}", e)))??;

    let shutdown = CancellationToken::new();

    let watcher = ConfigWatcher::spawn(
        WatcherConfig::new(args.url_config_path.clone()),
        Arc::clone(&engine),
        shutdown.clone(),
    )?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let service = Arc::new(LookupService::new(Arc::clone(&engine))?);
    server::serve(listener, service, shutdown.clone()).await?;

    // Teardown
    shutdown.cancel();
    watcher.join().await;

    let persister = Arc::clone(&engine);
    match tokio::task::spawn_blocking(move || persister.persist_all()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to persist cache: {}", e),
        Err(e) => warn!("Persist task failed: {}", e),
    }

    info!("URL lookup service shutdown complete");
    Ok(())
}

fn require_dir(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config(format!("{} is required", name)));
    }
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "{} {} does not exist",
            name,
            path.display()
        )));
    }
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "notify=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
