//! Tile grid planning.
//!
//! A [`TileGrid`] is the set of tile origins covering one pyramid level for a
//! given [`TileSpec`]. Origins start at (0, 0) and advance by the stride
//! (`tile size - overlap`) on each axis; the [`BoundaryPolicy`] decides what
//! happens where the last stride runs into the level edge. Cells are
//! numbered in row-major order (top to bottom, left to right) and can be
//! addressed randomly, iterated lazily, or split into interleaved shards.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigurationError;

// =============================================================================
// Boundary Policy
// =============================================================================

/// How the grid treats the strip where a full stride no longer fits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Emit every origin inside the level; tiles past the edge are
    /// zero-padded.
    #[default]
    Pad,
    /// Emit only tiles that fit entirely inside the level.
    Drop,
    /// Like `Drop`, plus one final tile snapped to the level edge when
    /// the fitting tiles leave a strip uncovered.
    Fit,
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoundaryPolicy::Pad => "pad",
            BoundaryPolicy::Drop => "drop",
            BoundaryPolicy::Fit => "fit",
        })
    }
}

impl FromStr for BoundaryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pad" => Ok(BoundaryPolicy::Pad),
            "drop" => Ok(BoundaryPolicy::Drop),
            "fit" => Ok(BoundaryPolicy::Fit),
            other => Err(format!(
                "unknown boundary policy '{}', expected pad, drop or fit",
                other
            )),
        }
    }
}

// =============================================================================
// Tile Spec / Coordinate
// =============================================================================

/// Tile size, overlap and boundary policy, in level pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileSpec {
    pub width: u32,
    pub height: u32,
    pub overlap: u32,
    pub policy: BoundaryPolicy,
}

impl TileSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            overlap: 0,
            policy: BoundaryPolicy::default(),
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn with_overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_policy(mut self, policy: BoundaryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stride_x(&self) -> u32 {
        self.width.saturating_sub(self.overlap)
    }

    pub fn stride_y(&self) -> u32 {
        self.height.saturating_sub(self.overlap)
    }

    /// Check that both strides are at least one pixel.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigurationError::ZeroTileSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.overlap >= self.width.min(self.height) {
            return Err(ConfigurationError::OverlapTooLarge {
                overlap: self.overlap,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Origin of one tile in a level's pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileCoordinate {
    pub level: usize,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(level: usize, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// Deterministic file stem, e.g. `L1_x512_y256`.
    pub fn stem(&self) -> String {
        format!("L{}_x{}_y{}", self.level, self.x, self.y)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} ({}, {})", self.level, self.x, self.y)
    }
}

// =============================================================================
// Tile Grid
// =============================================================================

/// Origins along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Axis {
    count: u32,
    stride: u32,
    /// Origin of the last cell when it is snapped to the edge (`Fit`)
    snapped: Option<u32>,
}

impl Axis {
    fn plan(dim: u32, size: u32, stride: u32, policy: BoundaryPolicy) -> Self {
        let fitting = if dim < size {
            0
        } else {
            (dim - size) / stride + 1
        };

        match policy {
            BoundaryPolicy::Drop => Self {
                count: fitting,
                stride,
                snapped: None,
            },
            BoundaryPolicy::Pad => {
                // Every origin inside the level; a level no larger than
                // one tile gets a single tile at 0.
                let count = match dim {
                    0 => 0,
                    d if d <= size => 1,
                    d => d.div_ceil(stride),
                };
                Self {
                    count,
                    stride,
                    snapped: None,
                }
            }
            BoundaryPolicy::Fit => {
                let covered = if fitting == 0 {
                    dim as u64
                } else {
                    (fitting - 1) as u64 * stride as u64 + size as u64
                };
                if fitting > 0 && covered < dim as u64 {
                    Self {
                        count: fitting + 1,
                        stride,
                        snapped: Some(dim - size),
                    }
                } else {
                    Self {
                        count: fitting,
                        stride,
                        snapped: None,
                    }
                }
            }
        }
    }

    fn origin(&self, i: u32) -> u32 {
        match self.snapped {
            Some(edge) if i + 1 == self.count => edge,
            _ => i * self.stride,
        }
    }
}

/// All tile origins of one level, in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    level: usize,
    level_width: u32,
    level_height: u32,
    spec: TileSpec,
    columns: Axis,
    rows: Axis,
}

impl TileGrid {
    /// Plan the grid for a level of the given size.
    pub fn new(
        level: usize,
        level_width: u32,
        level_height: u32,
        spec: TileSpec,
    ) -> Result<Self, ConfigurationError> {
        spec.validate()?;
        Ok(Self {
            level,
            level_width,
            level_height,
            spec,
            columns: Axis::plan(level_width, spec.width, spec.stride_x(), spec.policy),
            rows: Axis::plan(level_height, spec.height, spec.stride_y(), spec.policy),
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn spec(&self) -> &TileSpec {
        &self.spec
    }

    pub fn level_dimensions(&self) -> (u32, u32) {
        (self.level_width, self.level_height)
    }

    pub fn columns(&self) -> u32 {
        self.columns.count
    }

    pub fn rows(&self) -> u32 {
        self.rows.count
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.columns.count as usize * self.rows.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate of the `index`-th cell in row-major order.
    pub fn coordinate(&self, index: usize) -> Option<TileCoordinate> {
        if index >= self.len() {
            return None;
        }
        let columns = self.columns.count as usize;
        let column = (index % columns) as u32;
        let row = (index / columns) as u32;
        Some(TileCoordinate::new(
            self.level,
            self.columns.origin(column),
            self.rows.origin(row),
        ))
    }

    /// In-bounds part of a tile: `(width, height)` clipped to the level.
    pub fn content_size(&self, coordinate: &TileCoordinate) -> (u32, u32) {
        let width = self.level_width.saturating_sub(coordinate.x).min(self.spec.width);
        let height = self.level_height.saturating_sub(coordinate.y).min(self.spec.height);
        (width, height)
    }

    /// Lazy iterator over every cell.
    pub fn iter(&self) -> TileIter {
        TileIter {
            grid: *self,
            next: 0,
            step: 1,
        }
    }

    /// Every `count`-th cell starting at `index`.
    ///
    /// Shards `0..count` are disjoint and together yield the whole grid.
    pub fn shard(&self, index: usize, count: usize) -> Result<TileIter, ConfigurationError> {
        if count == 0 || index >= count {
            return Err(ConfigurationError::InvalidShard { index, count });
        }
        Ok(TileIter {
            grid: *self,
            next: index,
            step: count,
        })
    }
}

impl IntoIterator for &TileGrid {
    type Item = TileCoordinate;
    type IntoIter = TileIter;

    fn into_iter(self) -> TileIter {
        self.iter()
    }
}

/// Plan the tile grid for a level and return it as a lazy sequence.
pub fn plan(
    level: usize,
    level_width: u32,
    level_height: u32,
    spec: TileSpec,
) -> Result<TileIter, ConfigurationError> {
    Ok(TileGrid::new(level, level_width, level_height, spec)?.iter())
}

/// Owned cursor over a grid (or one shard of it).
#[derive(Debug, Clone)]
pub struct TileIter {
    grid: TileGrid,
    next: usize,
    step: usize,
}

impl TileIter {
    /// Grid index of the next cell to be yielded.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for TileIter {
    type Item = TileCoordinate;

    fn next(&mut self) -> Option<TileCoordinate> {
        let coordinate = self.grid.coordinate(self.next)?;
        self.next = self.next.saturating_add(self.step);
        Some(coordinate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.next).div_ceil(self.step);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileIter {}
