//! Per-tile label masks rasterized from annotation polygons.

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma};
use serde::Serialize;

use super::geometry::{scanline_spans, Point, Polygon, Rect};

/// Largest class id a single-label mask can hold.
pub const MAX_MASK_CLASSES: usize = u8::MAX as usize;

/// Whether, and how, tiles carry a rasterized label mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    #[default]
    None,
    /// One channel holding the class id of each pixel (0 = background)
    Single,
    /// One binary channel per class
    Multi,
}

impl fmt::Display for MaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaskMode::None => "none",
            MaskMode::Single => "single",
            MaskMode::Multi => "multi",
        })
    }
}

impl FromStr for MaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(MaskMode::None),
            "single" => Ok(MaskMode::Single),
            "multi" => Ok(MaskMode::Multi),
            other => Err(format!(
                "unknown mask mode '{}', expected none, single or multi",
                other
            )),
        }
    }
}

/// Rasterized annotation mask for one tile.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelMask {
    /// Pixel value = class id, 0 = background
    Single(GrayImage),
    /// Channel `i` marks class id `i + 1` with 1
    Multi(Vec<GrayImage>),
}

impl LabelMask {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            LabelMask::Single(mask) => mask.dimensions(),
            LabelMask::Multi(channels) => channels.first().map_or((0, 0), |c| c.dimensions()),
        }
    }

    /// Whether no pixel is labeled.
    pub fn is_empty(&self) -> bool {
        match self {
            LabelMask::Single(mask) => mask.pixels().all(|p| p.0[0] == 0),
            LabelMask::Multi(channels) => channels.iter().all(|c| c.pixels().all(|p| p.0[0] == 0)),
        }
    }
}

/// Fill the pixels of `mask` whose centres fall inside the polygon's
/// exterior with `value`, then clear the pixels inside its holes to 0.
///
/// `footprint` is the annotation-space rectangle covered by the whole mask.
pub(crate) fn paint_polygon(mask: &mut GrayImage, polygon: &Polygon, footprint: &Rect, value: u8) {
    fill_ring(mask, &polygon.exterior, footprint, value);
    for hole in &polygon.holes {
        fill_ring(mask, hole, footprint, 0);
    }
}

fn fill_ring(mask: &mut GrayImage, ring: &[Point], footprint: &Rect, value: u8) {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let scale_x = footprint.width() / width as f64;
    let scale_y = footprint.height() / height as f64;
    if scale_x <= 0.0 || scale_y <= 0.0 {
        return;
    }

    let column = |x: f64| ((x - footprint.min_x) / scale_x - 0.5).ceil().clamp(0.0, width as f64) as u32;

    for py in 0..height {
        let y = footprint.min_y + (py as f64 + 0.5) * scale_y;
        for (start, end) in scanline_spans(ring, y) {
            for px in column(start)..column(end) {
                mask.put_pixel(px, py, Luma([value]));
            }
        }
    }
}
