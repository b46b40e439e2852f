//! Decoder for JPEG-compressed pyramidal TIFF and Aperio SVS files.
//!
//! Region reads are assembled from the file's native tiles: every tile that
//! intersects the window is fetched with one range read, JPEG-decoded
//! (merging `JPEGTables` for abbreviated streams) and copied into place.
//! A small LRU of decoded native tiles absorbs the re-reads caused by tile
//! grids that do not line up with the file's own tiling; its size is a fixed
//! entry count, so memory stays independent of the slide size.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SlideError;
use crate::format::{prepare_tile_jpeg, PyramidLevel, TiffPyramid, TileTable};
use crate::io::{LocalFileReader, RangeReader};

use super::decoder::{LevelInfo, SlideDecoder};

/// Default number of decoded native tiles kept per slide.
pub const DEFAULT_DECODED_TILE_CACHE: usize = 16;

/// (level, tile_x, tile_y)
type NativeTileKey = (usize, u32, u32);

struct TiffLevel {
    geometry: PyramidLevel,
    table: TileTable,
}

/// A tiled TIFF/SVS slide opened for region reads.
pub struct TiffSlide<R: RangeReader = LocalFileReader> {
    reader: R,
    levels: Vec<TiffLevel>,
    infos: Vec<LevelInfo>,
    description: Option<String>,
    cache: Option<Mutex<LruCache<NativeTileKey, Arc<RgbImage>>>>,
}

impl TiffSlide<LocalFileReader> {
    /// Open a slide file from local disk.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        let reader = LocalFileReader::open(path).await?;
        Self::from_reader(reader).await
    }
}

impl<R: RangeReader> TiffSlide<R> {
    /// Parse the pyramid and load the tile tables of every level.
    pub async fn from_reader(reader: R) -> Result<Self, SlideError> {
        let TiffPyramid {
            header,
            levels: geometries,
            description,
        } = TiffPyramid::parse(&reader).await?;

        let mut levels = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            let table = TileTable::load(&reader, &header, &geometry).await?;
            levels.push(TiffLevel { geometry, table });
        }

        let infos = levels
            .iter()
            .map(|l| LevelInfo::new(l.geometry.width, l.geometry.height, l.geometry.downsample))
            .collect::<Vec<_>>();

        debug!(
            slide = reader.identifier(),
            levels = infos.len(),
            bigtiff = header.is_bigtiff,
            "Opened pyramidal TIFF"
        );

        let cache = NonZeroUsize::new(DEFAULT_DECODED_TILE_CACHE).map(|c| Mutex::new(LruCache::new(c)));

        Ok(Self {
            reader,
            levels,
            infos,
            description,
            cache,
        })
    }

    /// Set the number of decoded native tiles to keep (0 disables caching).
    pub fn with_tile_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)));
        self
    }

    /// ImageDescription of the first IFD, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the file carries Aperio SVS metadata.
    pub fn is_aperio(&self) -> bool {
        self.description().is_some_and(|d| d.starts_with("Aperio"))
    }

    /// Native tile size of a level.
    pub fn native_tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.levels
            .get(level)
            .map(|l| (l.geometry.tile_width, l.geometry.tile_height))
    }

    async fn cached_tile(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Arc<RgbImage>, SlideError> {
        let key = (level, tile_x, tile_y);
        if let Some(cache) = &self.cache {
            if let Some(tile) = cache.lock().await.get(&key) {
                return Ok(Arc::clone(tile));
            }
        }

        let tile = Arc::new(self.decode_tile(level, tile_x, tile_y).await?);

        if let Some(cache) = &self.cache {
            cache.lock().await.put(key, Arc::clone(&tile));
        }
        Ok(tile)
    }

    async fn decode_tile(&self, level: usize, tile_x: u32, tile_y: u32) -> Result<RgbImage, SlideError> {
        let decode_error = |message: String| SlideError::Decode {
            level,
            tile_x,
            tile_y,
            message,
        };

        let TiffLevel { geometry, table } = &self.levels[level];
        let location = geometry
            .tile_index(tile_x, tile_y)
            .and_then(|index| table.location(index))
            .ok_or_else(|| decode_error("tile outside the level grid".to_string()))?;

        // Sparse files leave never-written tiles with a zero byte count
        let (offset, length) = location;
        if length == 0 {
            return Ok(RgbImage::new(geometry.tile_width, geometry.tile_height));
        }

        let raw = self.reader.read_exact_at(offset, length as usize).await?;
        let jpeg = prepare_tile_jpeg(table.jpeg_tables(), raw);

        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| decode_error(e.to_string()))?
            .to_rgb8();

        if decoded.dimensions() != (geometry.tile_width, geometry.tile_height) {
            return Err(decode_error(format!(
                "decoded {}x{}, expected {}x{}",
                decoded.width(),
                decoded.height(),
                geometry.tile_width,
                geometry.tile_height
            )));
        }
        Ok(decoded)
    }
}

#[async_trait]
impl<R: RangeReader> SlideDecoder for TiffSlide<R> {
    fn levels(&self) -> &[LevelInfo] {
        &self.infos
    }

    fn identifier(&self) -> &str {
        self.reader.identifier()
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

        let mut region = RgbImage::new(width, height);
        if width == 0 || height == 0 {
            return Ok(region);
        }

        let geometry = &self.levels[level].geometry;
        let (tile_width, tile_height) = (geometry.tile_width, geometry.tile_height);
        let (first_x, last_x) = (x / tile_width, (x + width - 1) / tile_width);
        let (first_y, last_y) = (y / tile_height, (y + height - 1) / tile_height);

        for tile_y in first_y..=last_y {
            for tile_x in first_x..=last_x {
                let tile = self.cached_tile(level, tile_x, tile_y).await?;
                let dx = tile_x as i64 * tile_width as i64 - x as i64;
                let dy = tile_y as i64 * tile_height as i64 - y as i64;
                image::imageops::replace(&mut region, tile.as_ref(), dx, dy);
            }
        }

        Ok(region)
    }
}
