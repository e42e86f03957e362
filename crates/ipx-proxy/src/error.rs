//! Proxy error taxonomy.

use ipx_cache::CacheError;
use ipx_core::ValidationError;
use ipx_fetch::FetchError;
use ipx_image::ProcessError;

/// Error from [`ImageService`](crate::ImageService).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Rejected request input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Origin fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Source image could not be transformed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A required collaborator was not supplied to the builder.
    #[error("missing required dependency: {0}")]
    NilDependency(&'static str),

    /// A worker task was cancelled or panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::Fetch(FetchError::ImageTooLarge { .. })
            | Self::Process(ProcessError::UnsupportedFormat(_)) => 400,
            Self::Fetch(FetchError::NotFound) => 404,
            Self::Fetch(FetchError::FetchFailed(_)) => 502,
            Self::Fetch(FetchError::Timeout) => 504,
            Self::Process(ProcessError::ProcessingFailed(_))
            | Self::Cache(_)
            | Self::NilDependency(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Message safe to show to clients.
    ///
    /// Internal details (paths, origin responses) stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidPreset) => "invalid preset",
            Self::Validation(ValidationError::InvalidDid) => "invalid DID format",
            Self::Validation(ValidationError::InvalidCid) => "invalid CID format",
            Self::Validation(ValidationError::EmptyParameter) => "missing required parameters",
            Self::Fetch(FetchError::NotFound) => "blob not found",
            Self::Fetch(FetchError::Timeout) => "request timed out",
            Self::Fetch(FetchError::FetchFailed(_)) => "failed to fetch blob from PDS",
            Self::Fetch(FetchError::ImageTooLarge { .. }) => "image too large",
            Self::Process(ProcessError::UnsupportedFormat(_)) => "unsupported image format",
            Self::Process(ProcessError::ProcessingFailed(_)) => "image processing failed",
            Self::Cache(_) | Self::NilDependency(_) | Self::Internal(_) => "internal server error",
        }
    }
}
