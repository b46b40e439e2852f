//! Pyramid level identification for tiled TIFF/SVS files.
//!
//! A slide file holds several IFDs: the pyramid levels plus label, macro and
//! thumbnail images. Pyramid levels are the IFDs that are tiled, carry tile
//! offsets, are not flagged as masks, and share the base level's aspect ratio.
//! The largest one is level 0.

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::ifd::{
    read_ascii, read_entry_bytes, read_unsigned_array, Ifd, IfdEntry, Tag, TiffHeader,
    COMPRESSION_JPEG, HEADER_READ_SIZE,
};

/// Maximum number of IFDs followed in the chain.
const MAX_IFDS: usize = 256;

/// NewSubfileType bit marking a transparency mask.
const SUBFILE_MASK: u64 = 0x4;

/// Maximum relative difference between the X and Y downsample of a level.
const ASPECT_TOLERANCE: f64 = 0.1;

// =============================================================================
// PyramidLevel
// =============================================================================

/// Geometry and tile-table entries of one pyramid level.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Downsample relative to level 0 (average of the X and Y ratios)
    pub downsample: f64,
    pub compression: u16,
    offsets: IfdEntry,
    byte_counts: IfdEntry,
    jpeg_tables: Option<IfdEntry>,
}

impl PyramidLevel {
    fn from_ifd(ifd: &Ifd, header: &TiffHeader) -> Option<Self> {
        let subfile = ifd.inline_unsigned(Tag::NewSubfileType, header).unwrap_or(0);
        if subfile & SUBFILE_MASK != 0 {
            return None;
        }

        let width = ifd.inline_unsigned(Tag::ImageWidth, header)? as u32;
        let height = ifd.inline_unsigned(Tag::ImageLength, header)? as u32;
        let tile_width = ifd.inline_unsigned(Tag::TileWidth, header)? as u32;
        let tile_height = ifd.inline_unsigned(Tag::TileLength, header)? as u32;
        if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
            return None;
        }

        Some(Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression: ifd
                .inline_unsigned(Tag::Compression, header)
                .unwrap_or(1) as u16,
            offsets: ifd.entry(Tag::TileOffsets)?.clone(),
            byte_counts: ifd.entry(Tag::TileByteCounts)?.clone(),
            jpeg_tables: ifd.entry(Tag::JpegTables).cloned(),
        })
    }

    /// Row-major index of a tile, or `None` outside the grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// Parsed pyramid structure of a slide file.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    /// Levels sorted by resolution (0 = highest)
    pub levels: Vec<PyramidLevel>,
    /// ImageDescription of the first IFD (vendor metadata, e.g. Aperio)
    pub description: Option<String>,
}

impl TiffPyramid {
    /// Parse the header and IFD chain and identify pyramid levels.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = HEADER_READ_SIZE.min(reader.size() as usize);
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let mut ifds = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = header.first_ifd_offset;
        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() || !seen.insert(offset) {
                return Err(TiffError::InvalidIfdOffset(offset));
            }
            let ifd = Ifd::read(reader, &header, offset).await?;
            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        let description = match ifds.first().and_then(|ifd| ifd.entry(Tag::ImageDescription)) {
            Some(entry) => Some(read_ascii(reader, &header, entry).await?),
            None => None,
        };

        let candidates = ifds
            .iter()
            .filter_map(|ifd| PyramidLevel::from_ifd(ifd, &header))
            .collect();
        let levels = build_levels(candidates)?;

        Ok(Self {
            header,
            levels,
            description,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Whether the file carries Aperio SVS metadata.
    pub fn is_aperio(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| d.starts_with("Aperio"))
    }
}

/// Sort candidates by area and keep those consistent with the base level.
fn build_levels(mut candidates: Vec<PyramidLevel>) -> Result<Vec<PyramidLevel>, TiffError> {
    candidates.sort_by(|a, b| {
        let area_a = a.width as u64 * a.height as u64;
        let area_b = b.width as u64 * b.height as u64;
        area_b.cmp(&area_a)
    });

    let Some(base) = candidates.first() else {
        return Err(TiffError::NoPyramidLevels);
    };
    let (base_width, base_height) = (base.width as f64, base.height as f64);

    let mut levels: Vec<PyramidLevel> = Vec::new();
    for mut level in candidates {
        let downsample_x = base_width / level.width as f64;
        let downsample_y = base_height / level.height as f64;
        if (downsample_x - downsample_y).abs() / downsample_x > ASPECT_TOLERANCE {
            // Macro or label image stored as tiles
            continue;
        }
        if levels
            .last()
            .is_some_and(|prev| prev.width == level.width && prev.height == level.height)
        {
            continue;
        }
        if level.compression != COMPRESSION_JPEG {
            return Err(TiffError::UnsupportedCompression(level.compression));
        }
        level.downsample = if levels.is_empty() {
            1.0
        } else {
            (downsample_x + downsample_y) / 2.0
        };
        levels.push(level);
    }

    Ok(levels)
}

// =============================================================================
// TileTable
// =============================================================================

/// Tile locations and JPEG tables for one level.
#[derive(Debug, Clone)]
pub struct TileTable {
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    jpeg_tables: Option<Bytes>,
}

impl TileTable {
    /// Load the tile offset/byte-count arrays and JPEGTables of a level.
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        level: &PyramidLevel,
    ) -> Result<Self, TiffError> {
        let offsets = read_unsigned_array(reader, header, &level.offsets, "TileOffsets").await?;
        let byte_counts =
            read_unsigned_array(reader, header, &level.byte_counts, "TileByteCounts").await?;

        let expected = level.tiles_x as usize * level.tiles_y as usize;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {} tiles, found {} offsets and {} byte counts",
                    expected,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match &level.jpeg_tables {
            Some(entry) => Some(read_entry_bytes(reader, header, entry).await?),
            None => None,
        };

        Ok(Self {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Byte offset and length of a tile.
    pub fn location(&self, tile_index: usize) -> Option<(u64, u64)> {
        Some((
            *self.offsets.get(tile_index)?,
            *self.byte_counts.get(tile_index)?,
        ))
    }

    pub fn jpeg_tables(&self) -> Option<&[u8]> {
        self.jpeg_tables.as_deref()
    }
}
