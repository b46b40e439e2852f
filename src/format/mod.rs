//! Pyramidal TIFF container parsing.
//!
//! Supports JPEG-compressed, tiled TIFF and BigTIFF files in either byte
//! order, which covers Aperio SVS and most generic pyramidal TIFF exports.
//! Tiles are located through the IFD tile tables and fetched with individual
//! range reads; the file is never read in full.

pub mod ifd;
pub mod jpeg;
pub mod pyramid;

pub use ifd::{ByteOrder, Ifd, IfdEntry, Tag, TiffHeader};
pub use jpeg::{has_own_tables, merge_jpeg_tables, prepare_tile_jpeg};
pub use pyramid::{PyramidLevel, TiffPyramid, TileTable};
