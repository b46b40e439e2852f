//! Per-tile filter predicates.
//!
//! A filter gets two chances to reject a tile: [`TileFilter::accept_label`]
//! runs once the label is known but before any pixels are read, and
//! [`TileFilter::accept`] runs on the assembled record. Rejecting early
//! avoids the pixel read entirely.

use super::grid::TileCoordinate;
use super::stream::TileRecord;

/// Predicate deciding whether a tile is yielded.
pub trait TileFilter: Send + Sync {
    /// Called before the pixel read.
    fn accept_label(&self, _coordinate: &TileCoordinate, _label: Option<&str>) -> bool {
        true
    }

    /// Called on the finished record.
    fn accept(&self, _record: &TileRecord) -> bool {
        true
    }
}

impl<F> TileFilter for F
where
    F: Fn(&TileRecord) -> bool + Send + Sync,
{
    fn accept(&self, record: &TileRecord) -> bool {
        self(record)
    }
}

/// Keeps only tiles that received a label.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabeledOnly;

impl TileFilter for LabeledOnly {
    fn accept_label(&self, _coordinate: &TileCoordinate, label: Option<&str>) -> bool {
        label.is_some()
    }
}

/// Rejects tiles that are mostly bright slide background.
///
/// A pixel counts as background when every channel is at least
/// `brightness_threshold`. Only the in-bounds part of the tile is examined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TissueFilter {
    pub brightness_threshold: u8,
    /// Largest background fraction a kept tile may have
    pub max_background_fraction: f64,
}

impl Default for TissueFilter {
    fn default() -> Self {
        Self {
            brightness_threshold: 220,
            max_background_fraction: 0.8,
        }
    }
}

impl TissueFilter {
    /// Fraction of in-bounds pixels that are background.
    pub fn background_fraction(&self, record: &TileRecord) -> f64 {
        let (width, height) = (record.content_width, record.content_height);
        let total = width as u64 * height as u64;
        if total == 0 {
            return 1.0;
        }
        let mut background = 0u64;
        for y in 0..height {
            for x in 0..width {
                let pixel = record.pixels.get_pixel(x, y);
                if pixel.0.iter().all(|&c| c >= self.brightness_threshold) {
                    background += 1;
                }
            }
        }
        background as f64 / total as f64
    }
}

impl TileFilter for TissueFilter {
    fn accept(&self, record: &TileRecord) -> bool {
        self.background_fraction(record) <= self.max_background_fraction
    }
}
