//! Application state.
//!
//! Shared state for all request handlers.

use std::sync::Arc;
use std::time::Duration;

use ipx_proxy::ImageService;

use crate::resolver::DidResolver;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Read-through image pipeline.
    pub(crate) service: ImageService,
    /// Maps a DID to its PDS endpoint.
    pub(crate) resolver: Arc<dyn DidResolver>,
    /// Deadline applied to each origin fetch.
    pub(crate) fetch_timeout: Duration,
    /// Whether `/img` routes are mounted.
    pub(crate) enabled: bool,
}
