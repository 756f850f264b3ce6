//! Image preprocessing: raw upload bytes → model-ready tensor.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageError, ImageReader, Limits, RgbImage};

use crate::domain::ImageTensor;

/// Error type for image preprocessing. Every variant is a client error.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Unrecognised image format")]
    UnknownFormat,

    #[error("Image could not be decoded: {0}")]
    Decode(String),

    #[error("Image exceeds size limits: {0}")]
    TooLarge(String),

    #[error("Image has zero width or height")]
    Empty,
}

/// Decoder bounds for untrusted uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    /// Maximum width and height in pixels
    pub max_dimension: u32,
    /// Maximum bytes the decoder may allocate
    pub max_alloc_bytes: u64,
}

/// Decoder scratch space allowed on top of the frame buffer.
const DECODE_HEADROOM_BYTES: u64 = 8 * 1024 * 1024;

impl ImageLimits {
    /// Limits for a given maximum side length. The allocation cap covers an
    /// 8-bit RGBA frame of that size plus decoder headroom, so 16-bit images
    /// near the maximum side are refused as too large.
    #[must_use]
    pub fn for_dimension(max_dimension: u32) -> Self {
        let side = u64::from(max_dimension);
        Self {
            max_dimension,
            max_alloc_bytes: side
                .saturating_mul(side)
                .saturating_mul(4)
                .saturating_add(DECODE_HEADROOM_BYTES),
        }
    }

    fn to_decoder_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self::for_dimension(8192)
    }
}

fn decode_rgb(bytes: &[u8], limits: ImageLimits) -> Result<RgbImage, PreprocessError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;
    if reader.format().is_none() {
        return Err(PreprocessError::UnknownFormat);
    }
    reader.limits(limits.to_decoder_limits());

    let decoded = reader.decode().map_err(|e| match e {
        ImageError::Limits(l) => PreprocessError::TooLarge(l.to_string()),
        ImageError::Unsupported(u) => PreprocessError::Decode(u.to_string()),
        other => PreprocessError::Decode(other.to_string()),
    })?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(PreprocessError::Empty);
    }
    // Alpha is dropped, grayscale expanded.
    Ok(decoded.into_rgb8())
}

/// Decode `bytes`, resize to `target` `(width, height)` with Catmull-Rom,
/// and scale to `[0, 1]` in NHWC RGB order.
///
/// # Errors
/// Returns `PreprocessError` if the payload is not a decodable image or
/// exceeds `limits`.
pub fn preprocess_image(
    bytes: &[u8],
    target: (u32, u32),
    limits: &ImageLimits,
) -> Result<ImageTensor, PreprocessError> {
    let rgb = decode_rgb(bytes, *limits)?;
    let (width, height) = target;

    let rgb = if rgb.dimensions() == target {
        rgb
    } else {
        image::imageops::resize(&rgb, width, height, FilterType::CatmullRom)
    };

    let data = rgb
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    Ok(ImageTensor {
        width,
        height,
        data,
    })
}
