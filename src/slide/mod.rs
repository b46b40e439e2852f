//! Slide abstraction layer.
//!
//! The tiling engine only needs level geometry and region reads from a slide.
//! That capability is the [`SlideDecoder`] trait; this module provides two
//! implementations of it:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               TileStream                │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          SlideDecoder Trait             │
//! │  (levels + read_region, &self, Send)    │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │   TiffSlide     │    │    MemorySlide      │
//! │ (TIFF/SVS file) │    │ (decoded rasters)   │
//! └─────────────────┘    └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use wsi_tiler::slide::{SlideDecoder, TiffSlide};
//!
//! let slide = TiffSlide::open("slide.svs").await?;
//! // or, picking the decoder from the file content:
//! // let slide = wsi_tiler::slide::open_slide("slide.svs", 64).await?;
//! let level = slide.best_level_for_downsample(4.0).unwrap_or(0);
//! let region = slide.read_region(level, 0, 0, 512, 512).await?;
//! ```

mod decoder;
mod memory;
mod open;
mod tiff_slide;

pub use decoder::{LevelInfo, SlideDecoder};
pub use memory::MemorySlide;
pub use open::{is_tiff_magic, open_slide};
pub use tiff_slide::{TiffSlide, DEFAULT_DECODED_TILE_CACHE};
