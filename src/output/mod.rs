//! Tile output.
//!
//! - [`TileEncoder`]: JPEG/PNG encoding of tile pixels and PNG masks
//! - [`TileWriter`]: writes `<stem>.<ext>` files plus `manifest.jsonl`
//!
//! File stems come from [`crate::tile::TileCoordinate::stem`], so names are
//! deterministic and unique per tile.

mod encoder;
mod writer;

pub use encoder::{
    clamp_quality, is_valid_quality, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use writer::{read_manifest, ManifestEntry, TileWriter, MANIFEST_FILE};
