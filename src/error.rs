use thiserror::Error;

use crate::tile::TileCoordinate;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the local filesystem
    #[error("File error for {path}: {message}")]
    File { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(u16),

    /// No IFD qualified as a pyramid level
    #[error("No tiled pyramid levels found")]
    NoPyramidLevels,
}

/// Errors reported by a slide decoder.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Structural problem in the TIFF container
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Compressed tile data could not be decoded
    #[error("Failed to decode tile {tile_x},{tile_y} at level {level}: {message}")]
    Decode {
        level: usize,
        tile_x: u32,
        tile_y: u32,
        message: String,
    },

    /// Level index not present in the slide
    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    /// Region does not lie within the level
    #[error("Region {x},{y} {width}x{height} outside level {level} ({level_width}x{level_height})")]
    RegionOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        level_width: u32,
        level_height: u32,
    },

    /// Decoder returned a buffer of unexpected size
    #[error("Decoder returned {actual_width}x{actual_height}, expected {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Any other decoder failure (used by custom decoders)
    #[error("{0}")]
    Other(String),
}

/// Invalid session, tile spec, or level configuration.
///
/// Always raised before the first tile is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Tile size must be positive, got {width}x{height}")]
    ZeroTileSize { width: u32, height: u32 },

    #[error("Overlap {overlap} must be smaller than the tile size ({width}x{height})")]
    OverlapTooLarge { overlap: u32, width: u32, height: u32 },

    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    #[error("Invalid downsample {downsample} for level {level}")]
    InvalidDownsample { level: usize, downsample: f64 },

    #[error("Overlap threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("Invalid annotation space scale {0}")]
    InvalidAnnotationScale(f64),

    #[error("Invalid shard {index} of {count}")]
    InvalidShard { index: usize, count: usize },

    #[error("Label masks support at most 255 classes, index has {0}")]
    TooManyClasses(usize),

    #[error("Merge distance must be positive, got {0}")]
    InvalidMergeDistance(f64),
}

/// Reason a polygon was rejected by the annotation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryDefect {
    TooFewVertices,
    NonFiniteCoordinate,
    ZeroArea,
    SelfIntersecting,
}

impl std::fmt::Display for GeometryDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            GeometryDefect::TooFewVertices => "fewer than three distinct vertices",
            GeometryDefect::NonFiniteCoordinate => "non-finite coordinate",
            GeometryDefect::ZeroArea => "zero area",
            GeometryDefect::SelfIntersecting => "self-intersecting ring",
        };
        f.write_str(text)
    }
}

/// Malformed annotation geometry, detected while building the spatial index.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Annotation {index} ({label}): {ring} ring has {defect}")]
pub struct AnnotationGeometryError {
    /// Position of the annotation in the original ordering
    pub index: usize,
    pub label: String,
    /// `"exterior"` or `"hole N"`
    pub ring: String,
    pub defect: GeometryDefect,
}

/// Errors raised while loading or saving an annotation file.
#[derive(Debug, Error)]
pub enum AnnotationLoadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported GeoJSON: {0}")]
    Unsupported(String),
}

/// Errors surfaced by a tiling session.
#[derive(Debug, Clone, Error)]
pub enum TilingError {
    /// Invalid configuration, raised at session creation
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The decoder failed to produce pixels for one tile
    #[error("Source read error at {coordinate}: {source}")]
    SourceRead {
        coordinate: TileCoordinate,
        #[source]
        source: SlideError,
    },

    /// Malformed annotation polygon
    #[error("Annotation geometry error: {0}")]
    AnnotationGeometry(#[from] AnnotationGeometryError),
}

impl TilingError {
    /// Whether this error came from a failed pixel read.
    pub fn is_source_read(&self) -> bool {
        matches!(self, TilingError::SourceRead { .. })
    }

    /// Coordinate of the tile that failed, for source read errors.
    pub fn coordinate(&self) -> Option<TileCoordinate> {
        match self {
            TilingError::SourceRead { coordinate, .. } => Some(*coordinate),
            _ => None,
        }
    }
}

/// Errors raised while encoding or writing tiles.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Image encoding failed
    #[error("Failed to encode {what}: {message}")]
    Encode { what: String, message: String },

    /// Filesystem error under the output directory
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Manifest entry could not be serialized
    #[error("Failed to serialize manifest entry: {0}")]
    Manifest(#[from] serde_json::Error),
}
