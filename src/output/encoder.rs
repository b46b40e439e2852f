//! Tile image encoder.
//!
//! Encodes tile pixels to JPEG (lossy, configurable quality) or PNG
//! (lossless). Label masks are always written as PNG so class ids survive.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, RgbImage};
use serde::Serialize;

use crate::error::OutputError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Tile Format
// =============================================================================

/// Image format of written tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Jpeg,
    Png,
}

impl TileFormat {
    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(TileFormat::Jpeg),
            "png" => Ok(TileFormat::Png),
            other => Err(format!("unknown tile format '{}', expected jpg or png", other)),
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Encoder for tile pixels and masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEncoder {
    format: TileFormat,
    quality: u8,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(TileFormat::Jpeg, DEFAULT_JPEG_QUALITY)
    }
}

impl TileEncoder {
    /// Create an encoder. Quality is clamped to 1-100 and ignored for PNG.
    pub fn new(format: TileFormat, quality: u8) -> Self {
        Self {
            format,
            quality: clamp_quality(quality),
        }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode tile pixels in the configured format.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec rejects the buffer (e.g. a zero-sized
    /// image for JPEG).
    pub fn encode(&self, pixels: &RgbImage) -> Result<Bytes, OutputError> {
        let mut output = Vec::new();
        let result = match self.format {
            TileFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut output, self.quality).encode_image(pixels)
            }
            TileFormat::Png => PngEncoder::new(Cursor::new(&mut output)).write_image(
                pixels.as_raw(),
                pixels.width(),
                pixels.height(),
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| OutputError::Encode {
            what: format!("{} tile", self.format),
            message: e.to_string(),
        })?;
        Ok(Bytes::from(output))
    }

    /// Encode a single-channel mask as PNG.
    pub fn encode_mask(&self, mask: &GrayImage) -> Result<Bytes, OutputError> {
        let mut output = Vec::new();
        PngEncoder::new(Cursor::new(&mut output))
            .write_image(mask.as_raw(), mask.width(), mask.height(), ExtendedColorType::L8)
            .map_err(|e| OutputError::Encode {
                what: "mask".to_string(),
                message: e.to_string(),
            })?;
        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
