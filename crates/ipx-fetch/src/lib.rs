//! Origin fetcher for image blobs.
//!
//! Downloads the original blob for a `(did, cid)` pair from the user's data
//! server (PDS) through the `com.atproto.sync.getBlob` XRPC endpoint:
//!
//! - [`BlobFetcher`]: capability the proxy depends on
//! - [`PdsFetcher`]: `ureq`-backed implementation with a hard body size cap
//! - [`FetchContext`]: cancellation token and deadline of the incoming request
//! - [`FetchError`]: not found / timeout / failed / too large

mod context;
mod pds;

pub use context::FetchContext;
pub use pds::{DEFAULT_MAX_SOURCE_BYTES, PdsFetcher};

use async_trait::async_trait;

/// Error fetching a blob from an origin server.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The origin has no blob for this CID.
    #[error("blob not found")]
    NotFound,

    /// Request cancelled, deadline expired, or transport timed out.
    #[error("request timed out")]
    Timeout,

    /// Transport failure or unexpected origin response.
    #[error("failed to fetch blob from PDS: {0}")]
    FetchFailed(String),

    /// The blob exceeds the configured source size limit.
    #[error("image too large: exceeds {limit} bytes")]
    ImageTooLarge {
        /// Maximum accepted body size in bytes.
        limit: u64,
    },
}

/// Fetches raw blob bytes from an origin server.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Download the blob `cid` owned by `did` from `origin`.
    ///
    /// `origin` is an absolute base URL such as `https://pds.example.com`.
    async fn fetch(
        &self,
        ctx: &FetchContext,
        origin: &str,
        did: &str,
        cid: &str,
    ) -> Result<Vec<u8>, FetchError>;
}
