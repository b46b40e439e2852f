//! SlideDecoder trait for format-agnostic slide access.
//!
//! This is the narrow capability the tiling engine consumes from a whole-slide
//! image decoder: the level geometry and a region read. It is implemented by
//! [`crate::slide::TiffSlide`] for tiled TIFF/SVS files on disk and by
//! [`crate::slide::MemorySlide`] for rasters already held in memory.

use async_trait::async_trait;
use image::RgbImage;

use crate::error::SlideError;

// =============================================================================
// Level Information
// =============================================================================

/// Geometry of a single pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Downsample factor relative to level 0
    ///
    /// Level 0 has downsample 1.0, level 1 might have 4.0, etc.
    pub downsample: f64,
}

impl LevelInfo {
    pub fn new(width: u32, height: u32, downsample: f64) -> Self {
        Self {
            width,
            height,
            downsample,
        }
    }
}

// =============================================================================
// SlideDecoder Trait
// =============================================================================

/// Format-agnostic interface to a pyramidal slide.
///
/// Implementations must be safe to share between sharded workers; region reads
/// take `&self`.
#[async_trait]
pub trait SlideDecoder: Send + Sync {
    /// All levels, highest resolution first.
    fn levels(&self) -> &[LevelInfo];

    /// Identifier for logging (usually the file path).
    fn identifier(&self) -> &str;

    /// Read an RGB region from a level.
    ///
    /// `x`, `y`, `width` and `height` are in the level's own pixel space and the
    /// window always lies within the level; callers that need to read past
    /// the edge go through [`crate::tile::RegionReader`], which clamps and pads.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is out of range, the window is outside
    /// the level, or the underlying data cannot be read or decoded.
    async fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SlideError>;

    /// Get the number of pyramid levels.
    fn level_count(&self) -> usize {
        self.levels().len()
    }

    /// Get complete information about a level.
    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        self.levels().get(level).copied()
    }

    /// Get dimensions of the full-resolution (level 0) image.
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels().first().map(|l| (l.width, l.height))
    }

    /// Find the best level for a given downsample factor.
    ///
    /// Returns the level with the largest downsample that does not exceed the
    /// requested factor (so tiles are never read at a coarser resolution than
    /// asked for), falling back to level 0.
    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        let levels = self.levels();
        if levels.is_empty() {
            return None;
        }
        let best = levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.downsample <= downsample * 1.01)
            .max_by(|(_, a), (_, b)| a.downsample.total_cmp(&b.downsample))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Some(best)
    }

    /// Check that a window lies within a level.
    fn check_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<LevelInfo, SlideError> {
        let info = self.level_info(level).ok_or(SlideError::InvalidLevel {
            level,
            level_count: self.level_count(),
        })?;

        let fits_x = (x as u64 + width as u64) <= info.width as u64;
        let fits_y = (y as u64 + height as u64) <= info.height as u64;
        if !fits_x || !fits_y {
            return Err(SlideError::RegionOutOfBounds {
                level,
                x,
                y,
                width,
                height,
                level_width: info.width,
                level_height: info.height,
            });
        }
        Ok(info)
    }
}

// =============================================================================
// Tests
// =============================================================================
