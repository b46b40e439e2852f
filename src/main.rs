//! WSI Tiler - cut whole-slide images into labeled training tiles.
//!
//! This binary wires the tiling engine to the file system: it opens a slide,
//! loads annotations, runs one session per shard worker and writes the tiles
//! and manifest.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tiler::{
    annotation::{load_geojson, AnnotationIndex},
    config::{Cli, Command, GridArgs, InspectConfig, TileConfig},
    output::{TileEncoder, TileWriter},
    slide::{open_slide, SlideDecoder},
    tile::{LabeledOnly, SessionBuilder, TileGrid, TissueFilter},
    TilingError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Tile(config) => run_tile(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "wsi_tiler=debug" } else { "wsi_tiler=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve the level from `--level` or `--downsample` (level 0 otherwise).
fn resolve_level(grid: &GridArgs, slide: &dyn SlideDecoder) -> Result<usize, String> {
    if let Some(level) = grid.level {
        if level >= slide.level_count() {
            return Err(format!(
                "level {} requested, slide has {} levels",
                level,
                slide.level_count()
            ));
        }
        return Ok(level);
    }
    match grid.downsample {
        Some(downsample) => slide
            .best_level_for_downsample(downsample)
            .ok_or_else(|| "slide has no levels".to_string()),
        None => Ok(0),
    }
}

// =============================================================================
// Tile Command
// =============================================================================

/// Per-worker outcome.
#[derive(Debug, Default)]
struct WorkerStats {
    written: u64,
    skipped: u64,
    failed: u64,
}

async fn run_tile(config: TileConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let slide = match open_slide(&config.slide, config.cache_tiles).await {
        Ok(slide) => slide,
        Err(e) => {
            error!("Failed to open slide {}: {}", config.slide.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let level = match resolve_level(&config.grid, slide.as_ref()) {
        Ok(level) => level,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let index = match &config.annotations {
        Some(path) => {
            let annotations = match load_geojson(path).await {
                Ok(annotations) => annotations,
                Err(e) => {
                    error!("Failed to load annotations {}: {}", path.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            match AnnotationIndex::new(&annotations) {
                Ok(index) => {
                    info!(
                        annotations = index.len(),
                        classes = index.classes().len(),
                        "Indexed annotations"
                    );
                    Some(Arc::new(index))
                }
                Err(e) => {
                    error!("Invalid annotation: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let encoder = TileEncoder::new(config.format, config.jpeg_quality);
    let writer = match TileWriter::create(&config.output, encoder).await {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!("Failed to prepare output: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Slide: {} ({} levels)", slide.identifier(), slide.level_count());
    info!("  Level: {}", level);
    info!("  Tile spec: {:?}", config.grid.tile_spec());
    info!("  Output: {}", writer.directory().display());
    info!("  Workers: {}", config.workers);

    // All sessions are validated before the first worker starts.
    let mut sessions = Vec::with_capacity(config.workers);
    for shard in 0..config.workers {
        let mut builder = SessionBuilder::new(slide.clone(), level, config.grid.tile_spec())
            .overlap_threshold(config.threshold)
            .shard(shard, config.workers);
        if let Some(index) = &index {
            builder = builder
                .annotation_index(index.clone())
                .mask_mode(config.mask);
            match config.annotation_space() {
                Ok(space) => builder = builder.annotation_space(space),
                Err(e) => {
                    error!("Configuration error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        if let Some(classes) = config.class_filter() {
            builder = builder.classes(classes);
        }
        if config.labeled_only {
            builder = builder.filter(LabeledOnly);
        }
        if config.tissue_only {
            builder = builder.filter(TissueFilter::default());
        }
        match builder.build() {
            Ok(stream) => sessions.push(stream),
            Err(e) => {
                error!("Failed to create session: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut workers = JoinSet::new();
    for (shard, mut stream) in sessions.into_iter().enumerate() {
        let writer = writer.clone();
        let skip_errors = config.skip_errors;
        workers.spawn(async move {
            let mut stats = WorkerStats::default();
            loop {
                match stream.next_tile().await {
                    Ok(Some(record)) => {
                        writer.write(&record).await.map_err(|e| e.to_string())?;
                        stats.written += 1;
                    }
                    Ok(None) => break,
                    Err(e @ TilingError::SourceRead { .. }) if skip_errors => {
                        warn!(shard, "Skipping tile: {}", e);
                        stats.failed += 1;
                        stream.resume();
                    }
                    Err(e) => return Err(e.to_string()),
                }
            }
            stats.skipped = stream.tiles_skipped().saturating_sub(stats.failed);
            Ok::<_, String>(stats)
        });
    }

    let mut total = WorkerStats::default();
    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(stats)) => {
                total.written += stats.written;
                total.skipped += stats.skipped;
                total.failed += stats.failed;
            }
            Ok(Err(e)) => failure = Some(e),
            Err(e) => failure = Some(format!("worker panicked: {}", e)),
        }
    }

    if let Err(e) = writer.finish().await {
        error!("Failed to finish manifest: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        written = total.written,
        filtered = total.skipped,
        failed = total.failed,
        manifest = %writer.manifest_path().display(),
        "Tiling finished"
    );

    match run_outcome(&total, failure) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// A run succeeds only if no worker stopped and no tile failed.
fn run_outcome(total: &WorkerStats, failure: Option<String>) -> Result<(), String> {
    if let Some(e) = failure {
        return Err(format!("Tiling stopped: {}", e));
    }
    if total.failed > 0 {
        return Err(format!("{} tiles could not be read", total.failed));
    }
    Ok(())
}

// =============================================================================
// Inspect Command
// =============================================================================

#[derive(Serialize)]
struct LevelReport {
    level: usize,
    width: u32,
    height: u32,
    downsample: f64,
    columns: u32,
    rows: u32,
    tiles: usize,
}

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let slide = match open_slide(&config.slide, 0).await {
        Ok(slide) => slide,
        Err(e) => {
            eprintln!("Error: failed to open {}: {}", config.slide.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let selected = match resolve_level(&config.grid, slide.as_ref()) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let spec = config.grid.tile_spec();
    let mut reports = Vec::with_capacity(slide.level_count());
    for (level, info) in slide.levels().iter().enumerate() {
        let grid = match TileGrid::new(level, info.width, info.height, spec) {
            Ok(grid) => grid,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        reports.push(LevelReport {
            level,
            width: info.width,
            height: info.height,
            downsample: info.downsample,
            columns: grid.columns(),
            rows: grid.rows(),
            tiles: grid.len(),
        });
    }

    if config.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Slide: {}", slide.identifier());
    println!(
        "Tile spec: {}x{}, overlap {}, policy {}",
        spec.width, spec.height, spec.overlap, spec.policy
    );
    println!();
    println!("  level      width     height  downsample     grid     tiles");
    for report in &reports {
        let marker = if report.level == selected { "*" } else { " " };
        println!(
            "{} {:>5} {:>10} {:>10} {:>11.3} {:>8} {:>9}",
            marker,
            report.level,
            report.width,
            report.height,
            report.downsample,
            format!("{}x{}", report.columns, report.rows),
            report.tiles
        );
    }

    ExitCode::SUCCESS
}
