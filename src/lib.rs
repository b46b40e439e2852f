//! # WSI Tiler
//!
//! An on-the-fly tiling engine for Whole Slide Images (WSI).
//!
//! A slide is cut into fixed-size tiles one at a time, each tile optionally
//! labeled from annotation polygons, without ever holding more than one tile
//! of pixels in memory. The output is meant for training and inference
//! pipelines that consume tiles as a stream.
//!
//! ## Features
//!
//! - **Streaming**: a pull-based [`TileStream`] produces one [`TileRecord`] per call
//! - **Format support**: native parser for tiled, JPEG-compressed TIFF, BigTIFF and Aperio SVS
//! - **Boundary policies**: pad, drop or fit the last row and column of a level
//! - **Labels**: area-overlap labeling from GeoJSON polygons, with holes and class filters
//! - **Masks**: optional single- or multi-label rasterized masks per tile
//! - **Sharding**: disjoint interleaved grid subsets for parallel workers
//!
//! ## Architecture
//!
//! - [`io`] - range reads over local files and in-memory buffers
//! - [`mod@format`] - TIFF/BigTIFF structure parsing and JPEG tile handling
//! - [`slide`] - the [`SlideDecoder`] trait and its TIFF and in-memory implementations
//! - [`annotation`] - polygons, GeoJSON loading and the spatial label index
//! - [`tile`] - grid planning, coordinate mapping, region reads and the tile stream
//! - [`output`] - tile encoding, file naming and the JSON-lines manifest
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_tiler::{create_session, TiffSlide, TileSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let slide = Arc::new(TiffSlide::open("slide.svs").await?);
//!     let annotations = wsi_tiler::annotation::load_geojson("slide.geojson").await?;
//!
//!     let mut stream = create_session(slide, 0, TileSpec::square(256), Some(&annotations), None)?;
//!     while let Some(tile) = stream.next_tile().await? {
//!         println!("{} -> {:?}", tile.coordinate.stem(), tile.label);
//!     }
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod output;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use annotation::{Annotation, AnnotationIndex, LabelMask, MaskMode, Polygon, Rect};
pub use config::{Cli, Command, InspectConfig, TileConfig};
pub use error::{
    AnnotationGeometryError, AnnotationLoadError, ConfigurationError, IoError, OutputError,
    SlideError, TiffError, TilingError,
};
pub use io::{LocalFileReader, MemoryReader, RangeReader};
pub use output::{ManifestEntry, TileEncoder, TileFormat, TileWriter};
pub use slide::{open_slide, LevelInfo, MemorySlide, SlideDecoder, TiffSlide};
pub use tile::{
    create_session, plan, BoundaryPolicy, CoordinateMapper, SessionBuilder, TileCoordinate,
    TileFilter, TileGrid, TileRecord, TileSpec, TileStream,
};
