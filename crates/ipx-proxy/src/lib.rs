//! Image proxy orchestration.
//!
//! [`ImageService`] composes the cache, fetcher and processor into one
//! read-through operation:
//!
//! 1. resolve the preset (invalid names fail before any I/O)
//! 2. return the cached bytes on hit; cache read errors degrade to a miss
//! 3. fetch the source blob from the origin
//! 4. process it on a blocking thread
//! 5. store the result in a detached task that outlives the request
//!
//! Concurrent misses on the same key are not coalesced.

mod error;
mod service;
mod url;

pub use error::ProxyError;
pub use service::{ImageService, ImageServiceBuilder, cache_write_error_count};
pub use url::image_url;
