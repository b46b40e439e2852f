//! Conversions between level pixels, level-0 pixels and annotation space.
//!
//! Level coordinates are `u32`, level-0 coordinates `u64`. Going down to a
//! level divides by the level's downsample and floors; going up multiplies
//! and rounds up to the first level-0 pixel that maps back to the same level
//! pixel. That makes `from_level0(to_level0(x)) == x` exact, while the other
//! direction loses less than one downsample factor:
//!
//! ```text
//! 0 <= p - to_level0(from_level0(p)) < downsample
//! ```
//!
//! Annotation space is related to level 0 by an origin and a uniform scale:
//! `level0 = origin + annotation * scale`.

use serde::Serialize;

use crate::annotation::Rect;
use crate::error::ConfigurationError;
use crate::slide::LevelInfo;

use super::grid::TileCoordinate;

/// Largest deviation of level 0's downsample from 1.
const LEVEL0_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Annotation Space
// =============================================================================

/// Placement of annotation coordinates relative to level 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnotationSpace {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Level-0 pixels per annotation unit
    pub scale: f64,
}

impl Default for AnnotationSpace {
    fn default() -> Self {
        Self::identity()
    }
}

impl AnnotationSpace {
    pub const fn identity() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            scale: 1.0,
        }
    }

    pub fn new(origin_x: f64, origin_y: f64, scale: f64) -> Result<Self, ConfigurationError> {
        if !(scale.is_finite() && scale > 0.0 && origin_x.is_finite() && origin_y.is_finite()) {
            return Err(ConfigurationError::InvalidAnnotationScale(scale));
        }
        Ok(Self {
            origin_x,
            origin_y,
            scale,
        })
    }

    /// Map a level-0 rectangle into annotation space.
    pub fn from_level0(&self, rect: &Rect) -> Rect {
        Rect::new(
            (rect.min_x - self.origin_x) / self.scale,
            (rect.min_y - self.origin_y) / self.scale,
            (rect.max_x - self.origin_x) / self.scale,
            (rect.max_y - self.origin_y) / self.scale,
        )
    }

    /// Map an annotation-space rectangle onto level 0.
    pub fn to_level0(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.min_x * self.scale + self.origin_x,
            rect.min_y * self.scale + self.origin_y,
            rect.max_x * self.scale + self.origin_x,
            rect.max_y * self.scale + self.origin_y,
        )
    }
}

// =============================================================================
// Coordinate Mapper
// =============================================================================

/// Per-slide coordinate conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateMapper {
    downsamples: Vec<f64>,
    space: AnnotationSpace,
}

impl CoordinateMapper {
    /// Build a mapper from a slide's levels.
    ///
    /// # Errors
    ///
    /// Every downsample must be finite and at least 1, and level 0 must be 1.
    pub fn new(levels: &[LevelInfo]) -> Result<Self, ConfigurationError> {
        for (level, info) in levels.iter().enumerate() {
            let ds = info.downsample;
            let valid = ds.is_finite()
                && ds >= 1.0 - LEVEL0_TOLERANCE
                && (level > 0 || (ds - 1.0).abs() <= LEVEL0_TOLERANCE);
            if !valid {
                return Err(ConfigurationError::InvalidDownsample {
                    level,
                    downsample: ds,
                });
            }
        }
        Ok(Self {
            downsamples: levels.iter().map(|l| l.downsample.max(1.0)).collect(),
            space: AnnotationSpace::identity(),
        })
    }

    pub fn with_annotation_space(mut self, space: AnnotationSpace) -> Self {
        self.space = space;
        self
    }

    pub fn annotation_space(&self) -> &AnnotationSpace {
        &self.space
    }

    pub fn level_count(&self) -> usize {
        self.downsamples.len()
    }

    /// Downsample factor of a level.
    pub fn downsample(&self, level: usize) -> Result<f64, ConfigurationError> {
        self.downsamples
            .get(level)
            .copied()
            .ok_or(ConfigurationError::InvalidLevel {
                level,
                level_count: self.downsamples.len(),
            })
    }

    /// Level pixel to level-0 pixel.
    pub fn to_level0(&self, level: usize, x: u32, y: u32) -> Result<(u64, u64), ConfigurationError> {
        let ds = self.downsample(level)?;
        Ok((scale_up(x, ds), scale_up(y, ds)))
    }

    /// Level-0 pixel to level pixel (floor).
    pub fn from_level0(&self, level: usize, x0: u64, y0: u64) -> Result<(u32, u32), ConfigurationError> {
        let ds = self.downsample(level)?;
        Ok((scale_down(x0, ds), scale_down(y0, ds)))
    }

    /// Upper bound (exclusive) on `p - to_level0(from_level0(p))` per axis.
    pub fn round_trip_tolerance(&self, level: usize) -> Result<f64, ConfigurationError> {
        self.downsample(level)
    }

    /// Exact level-0 footprint of a `width` x `height` tile.
    pub fn footprint(
        &self,
        coordinate: &TileCoordinate,
        width: u32,
        height: u32,
    ) -> Result<Rect, ConfigurationError> {
        let ds = self.downsample(coordinate.level)?;
        Ok(Rect::from_origin(
            coordinate.x as f64 * ds,
            coordinate.y as f64 * ds,
            width as f64 * ds,
            height as f64 * ds,
        ))
    }

    /// Footprint of a tile in annotation space.
    pub fn annotation_footprint(
        &self,
        coordinate: &TileCoordinate,
        width: u32,
        height: u32,
    ) -> Result<Rect, ConfigurationError> {
        Ok(self.space.from_level0(&self.footprint(coordinate, width, height)?))
    }
}

fn scale_down(x0: u64, ds: f64) -> u32 {
    let v = (x0 as f64 / ds).floor();
    if v >= u32::MAX as f64 {
        u32::MAX
    } else {
        v as u32
    }
}

/// Smallest level-0 pixel that floors back to `x`.
fn scale_up(x: u32, ds: f64) -> u64 {
    let mut x0 = (x as f64 * ds).ceil() as u64;
    // The product can land one pixel off either way for non-integer factors
    while x0 > 0 && scale_down(x0 - 1, ds) >= x {
        x0 -= 1;
    }
    while scale_down(x0, ds) < x {
        x0 += 1;
    }
    x0
}
