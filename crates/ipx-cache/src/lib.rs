//! Disk cache for processed images.
//!
//! The cache is keyed by the triple `(preset, did, cid)`. The [`ImageCache`]
//! trait is the capability set the proxy depends on, so tests can swap in an
//! in-memory fake:
//!
//! - [`ImageCache`]: get / set / delete / cleanup / size
//! - [`DiskCache`]: filesystem implementation, LRU tracked through mtime
//! - [`Janitor`]: background task that runs [`ImageCache::cleanup`] periodically
//!
//! # Example
//!
//! ```no_run
//! use ipx_cache::{DiskCache, ImageCache};
//!
//! let cache = DiskCache::new("/var/cache/ipx/images", 10 * 1024 * 1024 * 1024, 30)?;
//! cache.set("avatar", "did:plc:abc", "bafyrei...", b"jpeg bytes")?;
//! assert!(cache.get("avatar", "did:plc:abc", "bafyrei...")?.is_some());
//! # Ok::<(), ipx_cache::CacheError>(())
//! ```

mod disk;
mod janitor;

pub use disk::DiskCache;
pub use janitor::Janitor;

/// Error from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A key component is empty.
    #[error("required parameter is empty")]
    EmptyParameter,

    /// The cache root path is empty.
    #[error("cache base path cannot be empty")]
    InvalidBasePath,

    /// The size cap is zero.
    #[error("cache max size must be positive")]
    InvalidMaxSize,

    /// Filesystem error.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage for processed images keyed by `(preset, did, cid)`.
///
/// Implementations must be safe to share between request handlers and the
/// background janitor.
pub trait ImageCache: Send + Sync {
    /// Read a cached entry.
    ///
    /// Returns `Ok(None)` on miss.
    fn get(&self, preset: &str, did: &str, cid: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store an entry, replacing any previous value for the same key.
    ///
    /// Readers never observe a partially written entry.
    fn set(&self, preset: &str, did: &str, cid: &str, data: &[u8]) -> Result<(), CacheError>;

    /// Remove an entry. Removing a missing entry succeeds.
    fn delete(&self, preset: &str, did: &str, cid: &str) -> Result<(), CacheError>;

    /// Run expiry and size eviction. Returns the number of entries removed.
    fn cleanup(&self) -> Result<usize, CacheError>;

    /// Total size of all entries in bytes.
    fn size(&self) -> Result<u64, CacheError>;
}
