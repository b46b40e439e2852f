//! Command-line configuration for the `wsi-tiler` binary.
//!
//! Arguments are parsed with clap and every option can also be set through
//! an environment variable with the `WSI_TILER_` prefix.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_tiler::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Tile(config) => println!("tiling {}", config.slide.display()),
//!     Command::Inspect(config) => println!("inspecting {}", config.slide.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_TILER_SLIDE` - Slide file (TIFF/SVS, PNG or JPEG)
//! - `WSI_TILER_OUTPUT` - Output directory
//! - `WSI_TILER_TILE_SIZE` - Square tile size (default: 256)
//! - `WSI_TILER_OVERLAP` - Overlap between neighbouring tiles (default: 0)
//! - `WSI_TILER_POLICY` - Boundary policy: pad, drop or fit (default: pad)
//! - `WSI_TILER_ANNOTATIONS` - GeoJSON annotation file
//! - `WSI_TILER_THRESHOLD` - Minimum covered fraction for a label (default: 0.5)
//! - `WSI_TILER_FORMAT` - Tile format: jpg or png (default: jpg)
//! - `WSI_TILER_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `WSI_TILER_WORKERS` - Parallel shard workers (default: 1)
//! - `WSI_TILER_CACHE_TILES` - Decoded native tiles kept per slide (default: 16)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::annotation::MaskMode;
use crate::output::{TileFormat, DEFAULT_JPEG_QUALITY};
use crate::slide::DEFAULT_DECODED_TILE_CACHE;
use crate::tile::{AnnotationSpace, BoundaryPolicy, TileSpec, DEFAULT_OVERLAP_THRESHOLD};

// =============================================================================
// Default Values
// =============================================================================

/// Default square tile size in level pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default overlap between neighbouring tiles.
pub const DEFAULT_OVERLAP: u32 = 0;

/// Default number of shard workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Upper bound on shard workers.
pub const MAX_WORKERS: usize = 256;

// =============================================================================
// CLI
// =============================================================================

/// WSI Tiler - cut whole-slide images into labeled training tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract tiles (and optional labels and masks) into a directory.
    Tile(TileConfig),

    /// Print the pyramid levels of a slide and the grid a tile spec yields.
    Inspect(InspectConfig),
}

// =============================================================================
// Shared Grid Arguments
// =============================================================================

/// Tile geometry options shared by `tile` and `inspect`.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct GridArgs {
    /// Square tile size in level pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILER_TILE_SIZE")]
    pub tile_size: u32,

    /// Tile width, overriding --tile-size.
    #[arg(long, env = "WSI_TILER_TILE_WIDTH")]
    pub tile_width: Option<u32>,

    /// Tile height, overriding --tile-size.
    #[arg(long, env = "WSI_TILER_TILE_HEIGHT")]
    pub tile_height: Option<u32>,

    /// Pixels shared by neighbouring tiles (stride = size - overlap).
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "WSI_TILER_OVERLAP")]
    pub overlap: u32,

    /// What to do where a full stride no longer fits: pad, drop or fit.
    #[arg(long, default_value_t = BoundaryPolicy::Pad, env = "WSI_TILER_POLICY")]
    pub policy: BoundaryPolicy,

    /// Pyramid level to tile.
    #[arg(long, env = "WSI_TILER_LEVEL", conflicts_with = "downsample")]
    pub level: Option<usize>,

    /// Target downsample; the finest level not coarser than this is used.
    #[arg(long, env = "WSI_TILER_DOWNSAMPLE")]
    pub downsample: Option<f64>,
}

impl GridArgs {
    /// Tile spec described by these arguments.
    pub fn tile_spec(&self) -> TileSpec {
        TileSpec::new(
            self.tile_width.unwrap_or(self.tile_size),
            self.tile_height.unwrap_or(self.tile_size),
        )
        .with_overlap(self.overlap)
        .with_policy(self.policy)
    }

    /// Check the geometry before a slide is opened.
    pub fn validate(&self) -> Result<(), String> {
        self.tile_spec().validate().map_err(|e| e.to_string())?;

        if let Some(downsample) = self.downsample {
            if !downsample.is_finite() || downsample < 1.0 {
                return Err(format!("downsample must be at least 1, got {}", downsample));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tile Command
// =============================================================================

/// Options of the `tile` subcommand.
#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Slide file (tiled TIFF/SVS, or a PNG/JPEG raster).
    #[arg(long, env = "WSI_TILER_SLIDE")]
    pub slide: PathBuf,

    /// Output directory for tiles and manifest.jsonl.
    #[arg(short, long, env = "WSI_TILER_OUTPUT")]
    pub output: PathBuf,

    #[command(flatten)]
    pub grid: GridArgs,

    // =========================================================================
    // Labels
    // =========================================================================
    /// GeoJSON file with labeled polygons in level-0 (or annotation) coordinates.
    #[arg(long, env = "WSI_TILER_ANNOTATIONS")]
    pub annotations: Option<PathBuf>,

    /// Minimum fraction of the tile an annotation must cover to label it.
    #[arg(long, default_value_t = DEFAULT_OVERLAP_THRESHOLD, env = "WSI_TILER_THRESHOLD")]
    pub threshold: f64,

    /// Only label with these classes (comma-separated).
    #[arg(long, env = "WSI_TILER_CLASSES", value_delimiter = ',')]
    pub classes: Vec<String>,

    /// Annotation-space origin X in level-0 pixels.
    #[arg(long, default_value_t = 0.0, env = "WSI_TILER_ANNOTATION_ORIGIN_X")]
    pub annotation_origin_x: f64,

    /// Annotation-space origin Y in level-0 pixels.
    #[arg(long, default_value_t = 0.0, env = "WSI_TILER_ANNOTATION_ORIGIN_Y")]
    pub annotation_origin_y: f64,

    /// Level-0 pixels per annotation unit.
    #[arg(long, default_value_t = 1.0, env = "WSI_TILER_ANNOTATION_SCALE")]
    pub annotation_scale: f64,

    /// Write label masks: none, single or multi.
    #[arg(long, default_value_t = MaskMode::None, env = "WSI_TILER_MASK")]
    pub mask: MaskMode,

    // =========================================================================
    // Filters
    // =========================================================================
    /// Skip tiles that receive no label.
    #[arg(long, default_value_t = false, env = "WSI_TILER_LABELED_ONLY")]
    pub labeled_only: bool,

    /// Skip tiles that are mostly bright background.
    #[arg(long, default_value_t = false, env = "WSI_TILER_TISSUE_ONLY")]
    pub tissue_only: bool,

    // =========================================================================
    // Output
    // =========================================================================
    /// Tile image format: jpg or png.
    #[arg(long, default_value_t = TileFormat::Jpeg, env = "WSI_TILER_FORMAT")]
    pub format: TileFormat,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_TILER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Execution
    // =========================================================================
    /// Number of parallel workers, each producing one shard of the grid.
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "WSI_TILER_WORKERS")]
    pub workers: usize,

    /// Decoded native TIFF tiles kept in memory (0 disables the cache).
    #[arg(long, default_value_t = DEFAULT_DECODED_TILE_CACHE, env = "WSI_TILER_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Skip tiles whose source read fails instead of stopping.
    #[arg(long, default_value_t = false, env = "WSI_TILER_SKIP_ERRORS")]
    pub skip_errors: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl TileConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.grid.validate()?;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!("threshold must be between 0 and 1, got {}", self.threshold));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(format!("workers must be between 1 and {}", MAX_WORKERS));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.annotations.is_none() {
            if self.labeled_only {
                return Err("--labeled-only needs --annotations".to_string());
            }
            if self.mask != MaskMode::None {
                return Err("--mask needs --annotations".to_string());
            }
        }

        self.annotation_space().map(|_| ())
    }

    /// Annotation coordinate space from the origin and scale options.
    pub fn annotation_space(&self) -> Result<AnnotationSpace, String> {
        AnnotationSpace::new(
            self.annotation_origin_x,
            self.annotation_origin_y,
            self.annotation_scale,
        )
        .map_err(|e| e.to_string())
    }

    /// Class filter, if any classes were given.
    pub fn class_filter(&self) -> Option<Vec<String>> {
        let classes: Vec<String> = self
            .classes
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        (!classes.is_empty()).then_some(classes)
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

/// Options of the `inspect` subcommand.
#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Slide file to inspect.
    #[arg(long, env = "WSI_TILER_SLIDE")]
    pub slide: PathBuf,

    #[command(flatten)]
    pub grid: GridArgs,

    /// Print the result as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InspectConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.grid.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
