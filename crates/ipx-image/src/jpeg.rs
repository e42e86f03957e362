//! JPEG output processor.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::error::ImageFormatHint;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader};
use ipx_core::{FitMode, Preset};

use crate::{ImageProcessor, ProcessError};

/// Resampling kernel for every resize.
const FILTER: FilterType = FilterType::Lanczos3;

/// Source formats the processor decodes.
const ACCEPTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// [`ImageProcessor`] producing JPEG at the preset quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegProcessor;

impl JpegProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ImageProcessor for JpegProcessor {
    fn process(&self, data: &[u8], preset: &Preset) -> Result<Vec<u8>, ProcessError> {
        let source = decode(data)?;
        let (src_width, src_height) = source.dimensions();

        let resized = match preset.fit {
            FitMode::Cover => source.resize_to_fill(preset.width, preset.height, FILTER),
            FitMode::Contain => fit_contain(source, preset.width, preset.height),
        };

        let output = encode_jpeg(&resized, preset.quality)?;
        tracing::debug!(
            preset = %preset.name,
            src_width,
            src_height,
            width = resized.width(),
            height = resized.height(),
            size_bytes = output.len(),
            "processed image"
        );
        Ok(output)
    }
}

/// Sniff the format from magic bytes and decode.
fn decode(data: &[u8]) -> Result<DynamicImage, ProcessError> {
    if data.is_empty() {
        return Err(ProcessError::UnsupportedFormat("empty input".to_owned()));
    }

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;

    let Some(format) = reader.format() else {
        return Err(ProcessError::UnsupportedFormat("unknown format".to_owned()));
    };
    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(ProcessError::UnsupportedFormat(format!("{format:?}")));
    }

    reader.decode().map_err(classify_decode_error)
}

fn classify_decode_error(err: ImageError) -> ProcessError {
    match err {
        ImageError::Unsupported(e) => ProcessError::UnsupportedFormat(e.to_string()),
        ImageError::Decoding(e)
            if matches!(e.format_hint(), ImageFormatHint::Exact(ImageFormat::Jpeg))
                && e.to_string().to_lowercase().contains("marker") =>
        {
            ProcessError::UnsupportedFormat(e.to_string())
        }
        other => ProcessError::ProcessingFailed(other.to_string()),
    }
}

/// Scale down to `max_width`, preserving aspect ratio and clamping to
/// `max_height` when it is non-zero. Never upscales.
fn fit_contain(source: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (src_width, src_height) = source.dimensions();
    if src_width <= max_width {
        return source;
    }

    let (width, height) = contain_dimensions(src_width, src_height, max_width, max_height);
    source.resize_exact(width, height, FILTER)
}

/// Target size for `contain`, each side rounded to nearest and at least 1.
fn contain_dimensions(src_width: u32, src_height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let mut width = max_width;
    let mut height = scale_rounded(src_height, max_width, src_width);
    if max_height > 0 && height > max_height {
        width = scale_rounded(src_width, max_height, src_height);
        height = max_height;
    }
    (width.max(1), height.max(1))
}

/// `round(value * num / den)` in integer arithmetic.
fn scale_rounded(value: u32, num: u32, den: u32) -> u32 {
    let den = u64::from(den.max(1));
    let scaled = (u64::from(value) * u64::from(num) * 2 + den) / (2 * den);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ProcessError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| ProcessError::ProcessingFailed(format!("encode: {e}")))?;
    Ok(buf)
}
