//! HTTP server for the ipx image proxy.
//!
//! Serves `GET /img/{preset}/plain/{did}/{cid}`: the DID is resolved to its
//! PDS, the blob is fetched and transformed through [`ipx_proxy::ImageService`]
//! and returned as JPEG with immutable caching headers.
//!
//! # Quick Start
//!
//! ```ignore
//! use ipx_server::{ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         port: 8080,
//!         ..ServerConfig::default()
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Client ──HTTP──► axum router (ipx-server)
//!                       │
//!                       ├─► DidResolver ──► PLC directory / did:web
//!                       │
//!                       └─► ImageService (ipx-proxy)
//!                               ├─► DiskCache (ipx-cache) ◄── Janitor
//!                               ├─► PdsFetcher (ipx-fetch)
//!                               └─► JpegProcessor (ipx-image)
//! ```

mod app;
mod error;
mod handlers;
mod middleware;
mod resolver;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ipx_cache::{DiskCache, Janitor};
use ipx_fetch::PdsFetcher;
use ipx_image::JpegProcessor;
use ipx_proxy::ImageService;
use state::AppState;

pub use resolver::{DidResolver, HttpDidResolver, ResolveError};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Serve `/img` routes and run the cache janitor.
    pub enabled: bool,
    /// Disk cache root.
    pub cache_dir: PathBuf,
    /// LRU size cap in bytes.
    pub cache_max_bytes: u64,
    /// Entry TTL in days (`0` disables expiry).
    pub cache_ttl_days: u32,
    /// Janitor period (zero disables the janitor).
    pub cleanup_interval: Duration,
    /// Deadline for one origin fetch.
    pub fetch_timeout: Duration,
    /// Largest accepted source blob in bytes.
    pub max_source_bytes: u64,
    /// PLC directory used to resolve `did:plc` identifiers.
    pub plc_directory_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7980,
            enabled: true,
            cache_dir: PathBuf::from("/var/cache/ipx/images"),
            cache_max_bytes: 10 * 1024 * 1024 * 1024,
            cache_ttl_days: 30,
            cleanup_interval: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(30),
            max_source_bytes: ipx_fetch::DEFAULT_MAX_SOURCE_BYTES,
            plc_directory_url: "https://plc.directory".to_owned(),
        }
    }
}

/// Run the server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the cache cannot be created or the server fails to
/// start.
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::new(DiskCache::new(
        config.cache_dir.clone(),
        config.cache_max_bytes,
        config.cache_ttl_days,
    )?);

    let service = ImageService::builder()
        .cache(Arc::clone(&cache) as Arc<dyn ipx_cache::ImageCache>)
        .processor(Arc::new(JpegProcessor::new()))
        .fetcher(Arc::new(PdsFetcher::new(
            config.fetch_timeout,
            config.max_source_bytes,
        )))
        .build()?;

    let resolver = HttpDidResolver::new(&config.plc_directory_url, config.fetch_timeout);

    let state = Arc::new(AppState {
        service,
        resolver: Arc::new(resolver),
        fetch_timeout: config.fetch_timeout,
        enabled: config.enabled,
    });

    let janitor = if config.enabled {
        Some(Janitor::start(Arc::clone(&cache), config.cleanup_interval))
    } else {
        tracing::info!("image proxy disabled, /img routes are not mounted");
        None
    };

    let app = app::create_router(state);

    let addr = SocketAddr::from_str(&format!("{}:{}", config.host, config.port))?;
    tracing::info!(
        address = %addr,
        cache_dir = %config.cache_dir.display(),
        "Starting server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(janitor) = janitor {
        janitor.shutdown().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from ipx config.
#[must_use]
pub fn server_config_from_ipx_config(config: &ipx_config::Config) -> ServerConfig {
    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        enabled: config.proxy.enabled,
        cache_dir: config.cache.path.clone(),
        cache_max_bytes: config.cache.max_bytes(),
        cache_ttl_days: config.cache.ttl_days(),
        cleanup_interval: config.cache.cleanup_interval(),
        fetch_timeout: config.fetch.timeout(),
        max_source_bytes: config.fetch.max_source_bytes(),
        plc_directory_url: config.identity.plc_directory_url.clone(),
    }
}
