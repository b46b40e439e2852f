//! Test utilities for integration tests.
//!
//! This module provides fake decoders and helper functions for creating test
//! slides: in-memory rasters, a decoder that fails at chosen windows, and a
//! builder for tiled JPEG TIFF files with real encoded tiles.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use wsi_tiler::error::SlideError;
use wsi_tiler::slide::{LevelInfo, MemorySlide, SlideDecoder};

// =============================================================================
// Rasters and In-Memory Slides
// =============================================================================

/// Deterministic RGB raster whose pixels encode their position.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x / 7 + y / 11) % 256) as u8])
    })
}

/// Single-level in-memory slide filled with a gradient.
pub fn memory_slide(width: u32, height: u32) -> MemorySlide {
    MemorySlide::new(gradient_image(width, height)).with_identifier("memory-test")
}

/// True if every channel of `a` is within `tolerance` of `b`.
pub fn pixels_close(a: &Rgb<u8>, b: &Rgb<u8>, tolerance: u8) -> bool {
    a.0.iter().zip(b.0.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

/// Unique scratch directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("wsi-tiler-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// =============================================================================
// Failing Decoder
// =============================================================================

/// Decoder that fails reads whose window starts at chosen level coordinates.
///
/// Every other read is served by the wrapped [`MemorySlide`].
pub struct FailingSlide {
    inner: MemorySlide,
    fail_at: HashSet<(usize, u32, u32)>,
    reads: AtomicUsize,
}

impl FailingSlide {
    pub fn new(inner: MemorySlide) -> Self {
        Self {
            inner,
            fail_at: HashSet::new(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, level: usize, x: u32, y: u32) -> Self {
        self.fail_at.insert((level, x, y));
        self
    }

    /// Number of `read_region` calls served or failed so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlideDecoder for FailingSlide {
    fn levels(&self) -> &[LevelInfo] {
        self.inner.levels()
    }

    fn identifier(&self) -> &str {
        "failing-test"
    }

    async fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SlideError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.contains(&(level, x, y)) {
            return Err(SlideError::Other(format!(
                "injected failure at level {} ({}, {})",
                level, x, y
            )));
        }
        self.inner.read_region(level, x, y, width, height).await
    }
}

// =============================================================================
// JPEG Helpers
// =============================================================================

/// Encode an RGB image as a complete baseline JPEG stream.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .unwrap();
    buf
}

/// Split a complete JPEG stream into a tables-only stream (DQT/DHT) and an
/// abbreviated stream without them, the way SVS files store tiles.
pub fn split_jpeg_tables(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut tile = vec![0xFF, 0xD8];

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        let marker = jpeg[pos + 1];
        if marker == 0xDA {
            break;
        }
        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let segment = &jpeg[pos..pos + 2 + length];
        match marker {
            0xDB | 0xC4 => tables.extend_from_slice(segment),
            // APPn segments are dropped from abbreviated tiles
            0xE0..=0xEF => {}
            _ => tile.extend_from_slice(segment),
        }
        pos += 2 + length;
    }
    tile.extend_from_slice(&jpeg[pos..]);
    tables.extend_from_slice(&[0xFF, 0xD9]);

    (tables, tile)
}

// =============================================================================
// TIFF Builder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

struct BuilderLevel {
    image: RgbImage,
    tile_size: u32,
    sparse: HashSet<(u32, u32)>,
}

/// Builder for tiled, JPEG-compressed TIFF/BigTIFF pyramids.
///
/// Each level is cut into `tile_size` tiles (edge tiles repeat the border)
/// and every tile is stored as its own JPEG stream.
pub struct TiffBuilder {
    endian: Endian,
    bigtiff: bool,
    abbreviated: bool,
    description: Option<String>,
    quality: u8,
    levels: Vec<BuilderLevel>,
    extra_ifds: Vec<(u32, u32)>,
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            endian: Endian::Little,
            bigtiff: false,
            abbreviated: false,
            description: None,
            quality: 95,
            levels: Vec::new(),
            extra_ifds: Vec::new(),
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    /// Store DQT/DHT once in JPEGTables and strip them from tiles.
    pub fn abbreviated(mut self, abbreviated: bool) -> Self {
        self.abbreviated = abbreviated;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn level(mut self, image: RgbImage, tile_size: u32) -> Self {
        self.levels.push(BuilderLevel {
            image,
            tile_size,
            sparse: HashSet::new(),
        });
        self
    }

    /// Leave a tile of the last added level unwritten (zero byte count).
    pub fn sparse_tile(mut self, tile_x: u32, tile_y: u32) -> Self {
        if let Some(level) = self.levels.last_mut() {
            level.sparse.insert((tile_x, tile_y));
        }
        self
    }

    /// Add a tiled, non-pyramid IFD (e.g. a label image) with a foreign aspect ratio.
    pub fn label_image(mut self, width: u32, height: u32) -> Self {
        self.extra_ifds.push((width, height));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ByteWriter::new(self.endian, self.bigtiff);
        writer.header();

        let mut shared_tables: Option<Vec<u8>> = None;
        let mut ifds = Vec::new();

        for (index, level) in self.levels.iter().enumerate() {
            let tile = level.tile_size;
            let (width, height) = level.image.dimensions();
            let tiles_x = width.div_ceil(tile);
            let tiles_y = height.div_ceil(tile);

            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    if level.sparse.contains(&(tx, ty)) {
                        offsets.push(0);
                        counts.push(0);
                        continue;
                    }
                    // Edge tiles repeat the last row/column past the image
                    let padded = RgbImage::from_fn(tile, tile, |px, py| {
                        let x = (tx * tile + px).min(width - 1);
                        let y = (ty * tile + py).min(height - 1);
                        *level.image.get_pixel(x, y)
                    });

                    let mut jpeg = encode_jpeg(&padded, self.quality);
                    if self.abbreviated {
                        let (tables, abbreviated) = split_jpeg_tables(&jpeg);
                        let shared = shared_tables.get_or_insert_with(|| tables.clone());
                        if *shared == tables {
                            jpeg = abbreviated;
                        }
                    }

                    offsets.push(writer.len() as u64);
                    counts.push(jpeg.len() as u64);
                    writer.bytes(&jpeg);
                }
            }

            let mut entries = vec![
                Entry::long(254, if index == 0 { 0 } else { 1 }),
                Entry::long(256, width),
                Entry::long(257, height),
                Entry::short(259, 7),
                Entry::short(322, tile as u16),
                Entry::short(323, tile as u16),
                Entry::offsets(324, &offsets, self.bigtiff),
                Entry::offsets(325, &counts, self.bigtiff),
            ];
            if index == 0 {
                if let Some(description) = &self.description {
                    entries.push(Entry::ascii(270, description));
                }
            }
            if let Some(tables) = &shared_tables {
                entries.push(Entry::undefined(347, tables));
            }
            ifds.push(entries);
        }

        for &(width, height) in &self.extra_ifds {
            let jpeg = encode_jpeg(&RgbImage::new(16, 16), self.quality);
            let offset = writer.len() as u64;
            writer.bytes(&jpeg);
            let tiles = (width.div_ceil(16) * height.div_ceil(16)) as usize;
            ifds.push(vec![
                Entry::long(256, width),
                Entry::long(257, height),
                Entry::short(259, 7),
                Entry::short(322, 16),
                Entry::short(323, 16),
                Entry::offsets(324, &vec![offset; tiles], self.bigtiff),
                Entry::offsets(325, &vec![jpeg.len() as u64; tiles], self.bigtiff),
            ]);
        }

        let mut previous_next_field = writer.first_ifd_field();
        for mut entries in ifds {
            entries.sort_by_key(|e| e.tag);
            let offset = writer.ifd(&entries);
            writer.patch_offset(previous_next_field, offset);
            previous_next_field = writer.len() - writer.offset_size();
        }

        writer.into_inner()
    }
}

/// One IFD entry with its value already serialized by field type.
struct Entry {
    tag: u16,
    field_type: u16,
    values: EntryValues,
}

enum EntryValues {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Bytes(Vec<u8>),
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Self {
            tag,
            field_type: 3,
            values: EntryValues::Short(vec![value]),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self {
            tag,
            field_type: 4,
            values: EntryValues::Long(vec![value]),
        }
    }

    fn offsets(tag: u16, values: &[u64], bigtiff: bool) -> Self {
        if bigtiff {
            Self {
                tag,
                field_type: 16,
                values: EntryValues::Long8(values.to_vec()),
            }
        } else {
            Self {
                tag,
                field_type: 4,
                values: EntryValues::Long(values.iter().map(|&v| v as u32).collect()),
            }
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Self {
            tag,
            field_type: 2,
            values: EntryValues::Bytes(bytes),
        }
    }

    fn undefined(tag: u16, bytes: &[u8]) -> Self {
        Self {
            tag,
            field_type: 7,
            values: EntryValues::Bytes(bytes.to_vec()),
        }
    }

    fn count(&self) -> u64 {
        match &self.values {
            EntryValues::Short(v) => v.len() as u64,
            EntryValues::Long(v) => v.len() as u64,
            EntryValues::Long8(v) => v.len() as u64,
            EntryValues::Bytes(v) => v.len() as u64,
        }
    }
}

/// Byte-order aware output buffer.
struct ByteWriter {
    endian: Endian,
    bigtiff: bool,
    data: Vec<u8>,
}

impl ByteWriter {
    fn new(endian: Endian, bigtiff: bool) -> Self {
        Self {
            endian,
            bigtiff,
            data: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn offset_size(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn u16(&mut self, value: u16) {
        match self.endian {
            Endian::Little => self.bytes(&value.to_le_bytes()),
            Endian::Big => self.bytes(&value.to_be_bytes()),
        }
    }

    fn u32(&mut self, value: u32) {
        match self.endian {
            Endian::Little => self.bytes(&value.to_le_bytes()),
            Endian::Big => self.bytes(&value.to_be_bytes()),
        }
    }

    fn u64(&mut self, value: u64) {
        match self.endian {
            Endian::Little => self.bytes(&value.to_le_bytes()),
            Endian::Big => self.bytes(&value.to_be_bytes()),
        }
    }

    fn offset(&mut self, value: u64) {
        if self.bigtiff {
            self.u64(value);
        } else {
            self.u32(value as u32);
        }
    }

    fn header(&mut self) {
        match self.endian {
            Endian::Little => self.bytes(b"II"),
            Endian::Big => self.bytes(b"MM"),
        }
        if self.bigtiff {
            self.u16(43);
            self.u16(8);
            self.u16(0);
            self.u64(0);
        } else {
            self.u16(42);
            self.u32(0);
        }
    }

    /// Position of the first-IFD offset in the header.
    fn first_ifd_field(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    fn patch_offset(&mut self, position: usize, value: u64) {
        let bytes: Vec<u8> = match (self.endian, self.bigtiff) {
            (Endian::Little, true) => value.to_le_bytes().to_vec(),
            (Endian::Big, true) => value.to_be_bytes().to_vec(),
            (Endian::Little, false) => (value as u32).to_le_bytes().to_vec(),
            (Endian::Big, false) => (value as u32).to_be_bytes().to_vec(),
        };
        self.data[position..position + bytes.len()].copy_from_slice(&bytes);
    }

    fn value_bytes(&self, values: &EntryValues) -> Vec<u8> {
        let mut scratch = ByteWriter::new(self.endian, self.bigtiff);
        match values {
            EntryValues::Short(v) => v.iter().for_each(|&x| scratch.u16(x)),
            EntryValues::Long(v) => v.iter().for_each(|&x| scratch.u32(x)),
            EntryValues::Long8(v) => v.iter().for_each(|&x| scratch.u64(x)),
            EntryValues::Bytes(v) => scratch.bytes(v),
        }
        scratch.into_inner()
    }

    /// Write out-of-line values, then the IFD itself; returns the IFD offset.
    /// The next-IFD field is written as 0.
    fn ifd(&mut self, entries: &[Entry]) -> u64 {
        let inline = self.offset_size();
        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload = self.value_bytes(&entry.values);
            if payload.len() <= inline {
                let mut field = payload;
                field.resize(inline, 0);
                fields.push(field);
            } else {
                if self.data.len() % 2 == 1 {
                    self.data.push(0);
                }
                let offset = self.data.len() as u64;
                self.bytes(&payload);
                let mut scratch = ByteWriter::new(self.endian, self.bigtiff);
                scratch.offset(offset);
                fields.push(scratch.into_inner());
            }
        }

        if self.data.len() % 2 == 1 {
            self.data.push(0);
        }
        let ifd_offset = self.data.len() as u64;
        if self.bigtiff {
            self.u64(entries.len() as u64);
        } else {
            self.u16(entries.len() as u16);
        }
        for (entry, field) in entries.iter().zip(fields) {
            self.u16(entry.tag);
            self.u16(entry.field_type);
            if self.bigtiff {
                self.u64(entry.count());
            } else {
                self.u32(entry.count() as u32);
            }
            self.bytes(&field);
        }
        self.offset(0);
        ifd_offset
    }
}
