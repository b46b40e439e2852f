//! On-the-fly tiling engine.
//!
//! # Architecture
//!
//! A session pulls one grid cell at a time through the pipeline below; the
//! only pixels held are those of the tile being produced.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               TileStream                │
//! │   next_tile(): cell → label → filters   │
//! │                → read → mask → record   │
//! └──┬──────────────┬──────────────┬────────┘
//!    │              │              │
//!    ▼              ▼              ▼
//! ┌────────┐ ┌──────────────┐ ┌──────────────┐
//! │TileGrid│ │ Coordinate-  │ │ RegionReader │
//! │(cells) │ │ Mapper       │ │ (clamp, pad) │
//! └────────┘ └──────┬───────┘ └──────┬───────┘
//!                   ▼                ▼
//!          ┌─────────────────┐ ┌──────────────┐
//!          │ AnnotationIndex │ │ SlideDecoder │
//!          └─────────────────┘ └──────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileGrid`]: row-major tile origins for a level under a [`BoundaryPolicy`]
//! - [`CoordinateMapper`]: level / level-0 / annotation-space conversions
//! - [`RegionReader`]: window reads clamped to the level and zero-padded
//! - [`TileFilter`]: label-time and content-time tile predicates
//! - [`TileStream`]: the session state machine, created with
//!   [`create_session`] or [`SessionBuilder`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wsi_tiler::slide::TiffSlide;
//! use wsi_tiler::tile::{create_session, TileSpec};
//!
//! let slide = Arc::new(TiffSlide::open("slide.svs").await?);
//! let mut stream = create_session(slide, 0, TileSpec::square(256), None, None)?;
//! while let Some(tile) = stream.next_tile().await? {
//!     println!("{} {:?}", tile.coordinate, tile.label);
//! }
//! ```

mod coords;
mod filter;
mod grid;
mod region;
mod stream;

pub use coords::{AnnotationSpace, CoordinateMapper};
pub use filter::{LabeledOnly, TileFilter, TissueFilter};
pub use grid::{plan, BoundaryPolicy, TileCoordinate, TileGrid, TileIter, TileSpec};
pub use region::RegionReader;
pub use stream::{
    create_session, SessionBuilder, TileRecord, TileStream, DEFAULT_OVERLAP_THRESHOLD,
};
