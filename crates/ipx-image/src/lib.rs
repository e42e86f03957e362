//! Image transformation for presets.
//!
//! [`ImageProcessor`] turns a raw source blob into the canonical output for a
//! [`Preset`](ipx_core::Preset). [`JpegProcessor`] accepts JPEG, PNG and WebP
//! sources and always produces baseline JPEG.

mod jpeg;

pub use jpeg::JpegProcessor;

use ipx_core::Preset;

/// Error transforming an image.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Input is empty, unrecognized, or in a format outside the accepted set.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Decoding, resizing or encoding failed.
    #[error("image processing failed: {0}")]
    ProcessingFailed(String),
}

/// Transforms source bytes according to a preset.
///
/// Processing is CPU-bound and synchronous; async callers should run it on a
/// blocking thread.
pub trait ImageProcessor: Send + Sync {
    /// Decode `data`, fit it to `preset`, and encode the result.
    fn process(&self, data: &[u8], preset: &Preset) -> Result<Vec<u8>, ProcessError>;
}
