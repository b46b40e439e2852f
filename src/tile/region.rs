//! Lazy region reads with edge padding.

use image::{imageops, RgbImage};

use crate::error::SlideError;
use crate::slide::SlideDecoder;

/// Reads tile windows through a [`SlideDecoder`], clamping them to the level
/// and zero-padding the result back to the requested size.
///
/// Nothing is cached; each call reads exactly one window.
pub struct RegionReader<'a, S: SlideDecoder + ?Sized> {
    slide: &'a S,
}

impl<'a, S: SlideDecoder + ?Sized> RegionReader<'a, S> {
    pub fn new(slide: &'a S) -> Self {
        Self { slide }
    }

    /// Read a `width` x `height` window at (`x`, `y`) in level pixels.
    ///
    /// The part of the window outside the level is zero. A window entirely
    /// outside the level is returned as zeros without touching the decoder.
    ///
    /// # Errors
    ///
    /// Propagates decoder failures, and reports a decoder that returns a
    /// buffer of the wrong size as [`SlideError::SizeMismatch`].
    pub async fn read(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SlideError> {
        let info = self.slide.level_info(level).ok_or(SlideError::InvalidLevel {
            level,
            level_count: self.slide.level_count(),
        })?;

        let inside_width = info.width.saturating_sub(x).min(width);
        let inside_height = info.height.saturating_sub(y).min(height);
        if inside_width == 0 || inside_height == 0 {
            return Ok(RgbImage::new(width, height));
        }

        let region = self
            .slide
            .read_region(level, x, y, inside_width, inside_height)
            .await?;

        if region.dimensions() != (inside_width, inside_height) {
            return Err(SlideError::SizeMismatch {
                width: inside_width,
                height: inside_height,
                actual_width: region.width(),
                actual_height: region.height(),
            });
        }

        if (inside_width, inside_height) == (width, height) {
            return Ok(region);
        }

        let mut padded = RgbImage::new(width, height);
        imageops::replace(&mut padded, &region, 0, 0);
        Ok(padded)
    }
}
