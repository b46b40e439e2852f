//! In-memory slide.
//!
//! Holds every level as a decoded raster. Used as the deterministic fake in
//! tests and for small, non-pyramidal images where holding the raster is fine.

use std::path::Path;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::SlideError;

use super::decoder::{LevelInfo, SlideDecoder};

/// A slide whose levels are rasters in memory.
pub struct MemorySlide {
    rasters: Vec<RgbImage>,
    infos: Vec<LevelInfo>,
    identifier: String,
}

impl MemorySlide {
    /// Single-level slide.
    pub fn new(base: RgbImage) -> Self {
        Self::with_pyramid(base, &[])
    }

    /// Slide with extra levels downsampled from `base` by each factor.
    ///
    /// Level dimensions are `floor(base / factor)` (at least 1 pixel) and the
    /// recorded downsample is the mean of the X and Y ratios, the way TIFF
    /// pyramids report it.
    pub fn with_pyramid(base: RgbImage, factors: &[u32]) -> Self {
        let (base_width, base_height) = base.dimensions();
        let mut rasters = vec![base];
        let mut infos = vec![LevelInfo::new(base_width, base_height, 1.0)];

        for &factor in factors.iter().filter(|&&f| f > 1) {
            let width = (base_width / factor).max(1);
            let height = (base_height / factor).max(1);
            let level = imageops::resize(&rasters[0], width, height, FilterType::Triangle);
            let downsample = (base_width as f64 / width as f64 + base_height as f64 / height as f64) / 2.0;
            rasters.push(level);
            infos.push(LevelInfo::new(width, height, downsample));
        }

        Self {
            rasters,
            infos,
            identifier: "memory".to_string(),
        }
    }

    /// Decode an image file (PNG or JPEG) into a single-level slide.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| SlideError::Other(format!(
            "failed to decode {}: {}",
            path.display(),
            e
        )))?;
        Ok(Self::new(image.to_rgb8()).with_identifier(path.display().to_string()))
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Raster of one level.
    pub fn level_raster(&self, level: usize) -> Option<&RgbImage> {
        self.rasters.get(level)
    }
}

#[async_trait]
impl SlideDecoder for MemorySlide {
    fn levels(&self) -> &[LevelInfo] {
        &self.infos
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SlideError> {
        self.check_region(level, x, y, width, height)?;
        Ok(imageops::crop_imm(&self.rasters[level], x, y, width, height).to_image())
    }
}
