//! Tiling sessions.
//!
//! A [`TileStream`] walks a [`TileGrid`] one cell per [`TileStream::next_tile`]
//! call: it maps the cell to annotation space, asks the index for a label,
//! runs the label filters, reads the pixels, builds the optional mask, runs
//! the record filters and hands the record to the caller. All iteration
//! state lives in the stream, and only the tile being produced is held.
//!
//! # Failure model
//!
//! Invalid configuration is rejected when the session is built, before any
//! tile is produced. A failed pixel read is returned as
//! [`TilingError::SourceRead`] at the tile where it happened; tiles already
//! yielded stay valid. After such a failure the stream reports end of stream
//! until [`TileStream::resume`] is called, which continues with the next cell.

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::annotation::{Annotation, AnnotationIndex, LabelMask, MaskMode, MAX_MASK_CLASSES};
use crate::error::{ConfigurationError, TilingError};
use crate::slide::SlideDecoder;

use super::coords::{AnnotationSpace, CoordinateMapper};
use super::filter::TileFilter;
use super::grid::{TileCoordinate, TileGrid, TileIter, TileSpec};
use super::region::RegionReader;

/// Default minimum fraction of a tile an annotation must cover.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.5;

// =============================================================================
// Tile Record
// =============================================================================

/// One produced tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub coordinate: TileCoordinate,
    /// Tile pixels, `spec.width` x `spec.height`
    pub pixels: RgbImage,
    /// Width of the part of the tile inside the level
    pub content_width: u32,
    /// Height of the part of the tile inside the level
    pub content_height: u32,
    pub label: Option<String>,
    pub mask: Option<LabelMask>,
}

impl TileRecord {
    /// Whether part of the tile is zero padding.
    pub fn is_padded(&self) -> bool {
        (self.content_width, self.content_height) != self.pixels.dimensions()
    }
}

// =============================================================================
// Session Builder
// =============================================================================

enum AnnotationSource {
    None,
    Set(Vec<Annotation>),
    Index(Arc<AnnotationIndex>),
}

/// Configures and validates a tiling session.
pub struct SessionBuilder<S: SlideDecoder + ?Sized = dyn SlideDecoder> {
    slide: Arc<S>,
    level: usize,
    spec: TileSpec,
    annotations: AnnotationSource,
    threshold: f64,
    classes: Option<Vec<String>>,
    mask_mode: MaskMode,
    space: AnnotationSpace,
    shard: (usize, usize),
    filters: Vec<Box<dyn TileFilter>>,
}

impl<S: SlideDecoder + ?Sized> SessionBuilder<S> {
    pub fn new(slide: Arc<S>, level: usize, spec: TileSpec) -> Self {
        Self {
            slide,
            level,
            spec,
            annotations: AnnotationSource::None,
            threshold: DEFAULT_OVERLAP_THRESHOLD,
            classes: None,
            mask_mode: MaskMode::None,
            space: AnnotationSpace::identity(),
            shard: (0, 1),
            filters: Vec::new(),
        }
    }

    /// Annotation set to index when the session is built.
    pub fn annotations(mut self, annotations: &[Annotation]) -> Self {
        self.annotations = AnnotationSource::Set(annotations.to_vec());
        self
    }

    /// Already-built index, e.g. shared between shard workers.
    pub fn annotation_index(mut self, index: Arc<AnnotationIndex>) -> Self {
        self.annotations = AnnotationSource::Index(index);
        self
    }

    pub fn overlap_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Only consider annotations with these labels.
    pub fn classes(mut self, classes: Vec<String>) -> Self {
        self.classes = Some(classes);
        self
    }

    pub fn mask_mode(mut self, mode: MaskMode) -> Self {
        self.mask_mode = mode;
        self
    }

    pub fn annotation_space(mut self, space: AnnotationSpace) -> Self {
        self.space = space;
        self
    }

    /// Produce only every `count`-th cell, starting at `index`.
    pub fn shard(mut self, index: usize, count: usize) -> Self {
        self.shard = (index, count);
        self
    }

    pub fn filter(mut self, filter: impl TileFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Validate everything and create the stream.
    ///
    /// # Errors
    ///
    /// [`TilingError::Configuration`] for an invalid tile spec, level,
    /// threshold, annotation space, shard or class count, and
    /// [`TilingError::AnnotationGeometry`] for a malformed polygon.
    pub fn build(self) -> Result<TileStream<S>, TilingError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigurationError::InvalidThreshold(self.threshold).into());
        }
        let space = AnnotationSpace::new(self.space.origin_x, self.space.origin_y, self.space.scale)?;

        let mapper = CoordinateMapper::new(self.slide.levels())?.with_annotation_space(space);
        mapper.downsample(self.level)?;
        let info = self
            .slide
            .level_info(self.level)
            .ok_or(ConfigurationError::InvalidLevel {
                level: self.level,
                level_count: self.slide.level_count(),
            })?;

        let grid = TileGrid::new(self.level, info.width, info.height, self.spec)?;
        let (shard_index, shard_count) = self.shard;
        let cells = grid.shard(shard_index, shard_count)?;

        let index = match self.annotations {
            AnnotationSource::None => None,
            AnnotationSource::Set(annotations) => Some(Arc::new(AnnotationIndex::new(&annotations)?)),
            AnnotationSource::Index(index) => Some(index),
        };

        if self.mask_mode != MaskMode::None {
            if let Some(index) = &index {
                if index.classes().len() > MAX_MASK_CLASSES {
                    return Err(ConfigurationError::TooManyClasses(index.classes().len()).into());
                }
            }
        }

        info!(
            slide = self.slide.identifier(),
            level = self.level,
            level_width = info.width,
            level_height = info.height,
            columns = grid.columns(),
            rows = grid.rows(),
            tiles = cells.len(),
            policy = %self.spec.policy,
            shard = shard_index,
            shards = shard_count,
            annotations = index.as_ref().map_or(0, |i| i.len()),
            "Created tiling session"
        );

        Ok(TileStream {
            slide: self.slide,
            grid,
            planned: cells.len(),
            cells,
            mapper,
            index,
            threshold: self.threshold,
            classes: self.classes,
            mask_mode: self.mask_mode,
            filters: self.filters,
            failed_at: None,
            yielded: 0,
            skipped: 0,
        })
    }
}

/// Create a session with default options.
///
/// `annotations` are indexed once for the session; `overlap_threshold`
/// defaults to [`DEFAULT_OVERLAP_THRESHOLD`].
pub fn create_session<S: SlideDecoder + ?Sized>(
    slide: Arc<S>,
    level: usize,
    spec: TileSpec,
    annotations: Option<&[Annotation]>,
    overlap_threshold: Option<f64>,
) -> Result<TileStream<S>, TilingError> {
    let mut builder = SessionBuilder::new(slide, level, spec)
        .overlap_threshold(overlap_threshold.unwrap_or(DEFAULT_OVERLAP_THRESHOLD));
    if let Some(annotations) = annotations {
        builder = builder.annotations(annotations);
    }
    builder.build()
}

// =============================================================================
// Tile Stream
// =============================================================================

/// Pull-based producer of [`TileRecord`]s for one session.
pub struct TileStream<S: SlideDecoder + ?Sized = dyn SlideDecoder> {
    slide: Arc<S>,
    grid: TileGrid,
    cells: TileIter,
    planned: usize,
    mapper: CoordinateMapper,
    index: Option<Arc<AnnotationIndex>>,
    threshold: f64,
    classes: Option<Vec<String>>,
    mask_mode: MaskMode,
    filters: Vec<Box<dyn TileFilter>>,
    failed_at: Option<TileCoordinate>,
    yielded: u64,
    skipped: u64,
}

impl<S: SlideDecoder + ?Sized> TileStream<S> {
    /// Produce the next tile, or `None` at the end of the stream.
    ///
    /// After a [`TilingError::SourceRead`] this keeps returning `Ok(None)`
    /// until [`TileStream::resume`] is called.
    pub async fn next_tile(&mut self) -> Result<Option<TileRecord>, TilingError> {
        if self.failed_at.is_some() {
            return Ok(None);
        }

        while let Some(coordinate) = self.cells.next() {
            let label = self.label_for(&coordinate)?;
            if !self
                .filters
                .iter()
                .all(|f| f.accept_label(&coordinate, label.as_deref()))
            {
                self.skip(&coordinate, "label");
                continue;
            }

            let (width, height) = (self.grid.spec().width, self.grid.spec().height);
            let read = RegionReader::new(self.slide.as_ref())
                .read(coordinate.level, coordinate.x, coordinate.y, width, height)
                .await;
            let pixels = match read {
                Ok(pixels) => pixels,
                Err(source) => {
                    warn!(
                        slide = self.slide.identifier(),
                        %coordinate,
                        error = %source,
                        yielded = self.yielded,
                        "Failed to read tile"
                    );
                    self.failed_at = Some(coordinate);
                    return Err(TilingError::SourceRead { coordinate, source });
                }
            };

            let (content_width, content_height) = self.grid.content_size(&coordinate);
            let record = TileRecord {
                coordinate,
                mask: self.mask_for(&coordinate)?,
                pixels,
                content_width,
                content_height,
                label,
            };

            if !self.filters.iter().all(|f| f.accept(&record)) {
                self.skip(&coordinate, "content");
                continue;
            }

            self.yielded += 1;
            debug!(
                %coordinate,
                label = record.label.as_deref().unwrap_or("-"),
                "Produced tile"
            );
            return Ok(Some(record));
        }

        Ok(None)
    }

    /// Clear a source-read failure and continue after the failed tile.
    ///
    /// Returns the coordinate that was skipped, if the stream was halted.
    pub fn resume(&mut self) -> Option<TileCoordinate> {
        let failed = self.failed_at.take()?;
        self.skipped += 1;
        debug!(%failed, "Resuming after failed tile");
        Some(failed)
    }

    /// Coordinate of the tile whose read failed, while the stream is halted.
    pub fn failed_at(&self) -> Option<TileCoordinate> {
        self.failed_at
    }

    pub fn tiles_yielded(&self) -> u64 {
        self.yielded
    }

    /// Tiles rejected by filters or skipped by [`TileStream::resume`].
    pub fn tiles_skipped(&self) -> u64 {
        self.skipped
    }

    /// Number of cells this session (or shard) covers.
    pub fn planned_tiles(&self) -> usize {
        self.planned
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn annotation_index(&self) -> Option<&AnnotationIndex> {
        self.index.as_deref()
    }

    fn skip(&mut self, coordinate: &TileCoordinate, stage: &'static str) {
        self.skipped += 1;
        debug!(%coordinate, stage, "Filtered tile");
    }

    fn label_for(&self, coordinate: &TileCoordinate) -> Result<Option<String>, TilingError> {
        let Some(index) = &self.index else {
            return Ok(None);
        };
        let spec = self.grid.spec();
        let footprint = self
            .mapper
            .annotation_footprint(coordinate, spec.width, spec.height)?;
        Ok(index
            .label_for_classes(&footprint, self.threshold, self.classes.as_deref())
            .map(str::to_string))
    }

    fn mask_for(&self, coordinate: &TileCoordinate) -> Result<Option<LabelMask>, TilingError> {
        let (Some(index), false) = (&self.index, self.mask_mode == MaskMode::None) else {
            return Ok(None);
        };
        let spec = self.grid.spec();
        let footprint = self
            .mapper
            .annotation_footprint(coordinate, spec.width, spec.height)?;
        let mask = index.mask_for(
            &footprint,
            spec.width,
            spec.height,
            self.mask_mode == MaskMode::Multi,
            self.classes.as_deref(),
        )?;
        Ok(Some(mask))
    }
}
