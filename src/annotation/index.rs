//! Spatial index over labeled annotation polygons.
//!
//! The index owns a validated copy of every polygon in an arena and groups
//! arena slots into a coarse grid of square buckets keyed by
//! `(floor(x / bucket), floor(y / bucket))`. A query walks only the buckets
//! its footprint touches, then computes exact intersection areas by clipping
//! each candidate against the footprint. Polygons whose bounding box would
//! span too many buckets are kept in a separate list checked by every query,
//! so index memory is bounded by the annotation count, not their extent.

use std::collections::HashMap;

use image::GrayImage;
use tracing::debug;

use crate::error::{AnnotationGeometryError, ConfigurationError, GeometryDefect};

use super::geometry::{validate_ring, Polygon, Rect};
use super::mask::{paint_polygon, LabelMask, MAX_MASK_CLASSES};

/// Default bucket edge length in annotation-space units.
pub const DEFAULT_BUCKET_SIZE: f64 = 2048.0;

/// Annotations spanning more buckets than this go to the oversized list.
const MAX_BUCKETS_PER_ANNOTATION: i64 = 256;

/// A polygon region with a class label, in annotation space.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub label: String,
    pub polygon: Polygon,
}

impl Annotation {
    pub fn new(label: impl Into<String>, polygon: Polygon) -> Self {
        Self {
            label: label.into(),
            polygon,
        }
    }
}

/// One annotation overlapping a footprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection<'a> {
    /// Position in the original annotation order
    pub index: usize,
    pub label: &'a str,
    /// Intersection area in annotation-space units
    pub area: f64,
}

#[derive(Debug)]
struct Entry {
    label: String,
    polygon: Polygon,
    bbox: Rect,
    /// 1-based position of the label in the class table
    class_id: usize,
}

/// Read-only spatial index answering label queries for tile footprints.
#[derive(Debug)]
pub struct AnnotationIndex {
    entries: Vec<Entry>,
    buckets: HashMap<(i64, i64), Vec<u32>>,
    oversized: Vec<u32>,
    bucket_size: f64,
    classes: Vec<String>,
}

impl AnnotationIndex {
    /// Validate and index a set of annotations.
    ///
    /// # Errors
    ///
    /// Returns the first malformed ring found, in annotation order.
    pub fn new(annotations: &[Annotation]) -> Result<Self, AnnotationGeometryError> {
        Self::with_bucket_size(annotations, DEFAULT_BUCKET_SIZE)
    }

    /// Like [`AnnotationIndex::new`] with an explicit bucket size.
    ///
    /// Non-positive or non-finite sizes fall back to [`DEFAULT_BUCKET_SIZE`].
    pub fn with_bucket_size(
        annotations: &[Annotation],
        bucket_size: f64,
    ) -> Result<Self, AnnotationGeometryError> {
        let bucket_size = if bucket_size.is_finite() && bucket_size > 0.0 {
            bucket_size
        } else {
            DEFAULT_BUCKET_SIZE
        };

        let mut index = Self {
            entries: Vec::with_capacity(annotations.len()),
            buckets: HashMap::new(),
            oversized: Vec::new(),
            bucket_size,
            classes: Vec::new(),
        };

        for (position, annotation) in annotations.iter().enumerate() {
            let (polygon, bbox) = validated(position, annotation)?;

            let class_id = match index.classes.iter().position(|c| *c == annotation.label) {
                Some(existing) => existing + 1,
                None => {
                    index.classes.push(annotation.label.clone());
                    index.classes.len()
                }
            };

            let slot = position as u32;
            let (x0, y0, x1, y1) = index.bucket_range(&bbox);
            let span = (x1 - x0 + 1).saturating_mul(y1 - y0 + 1);
            if span > MAX_BUCKETS_PER_ANNOTATION {
                index.oversized.push(slot);
            } else {
                for by in y0..=y1 {
                    for bx in x0..=x1 {
                        index.buckets.entry((bx, by)).or_default().push(slot);
                    }
                }
            }

            index.entries.push(Entry {
                label: annotation.label.clone(),
                polygon,
                bbox,
                class_id,
            });
        }

        debug!(
            annotations = index.entries.len(),
            classes = index.classes.len(),
            buckets = index.buckets.len(),
            oversized = index.oversized.len(),
            "Built annotation index"
        );

        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels in order of first appearance. Class id = position + 1.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Class id of a label (0 is reserved for background).
    pub fn class_id(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == label).map(|p| p + 1)
    }

    /// Label of the annotation that best covers `footprint`, if any.
    ///
    /// An annotation qualifies when `intersection / footprint area` is at
    /// least `threshold` and the intersection is non-empty. The largest
    /// intersection wins; equal areas go to the earliest annotation.
    pub fn label_for(&self, footprint: &Rect, threshold: f64) -> Option<&str> {
        self.label_for_classes(footprint, threshold, None)
    }

    /// [`AnnotationIndex::label_for`] restricted to annotations whose label
    /// is in `classes`.
    pub fn label_for_classes(
        &self,
        footprint: &Rect,
        threshold: f64,
        classes: Option<&[String]>,
    ) -> Option<&str> {
        let tile_area = footprint.area();
        if tile_area <= 0.0 {
            return None;
        }

        let mut best: Option<Intersection<'_>> = None;
        for hit in self.hits(footprint, classes) {
            if hit.area / tile_area < threshold {
                continue;
            }
            if best.map_or(true, |b| hit.area > b.area) {
                best = Some(hit);
            }
        }
        best.map(|b| b.label)
    }

    /// Every annotation overlapping `footprint`, in original order.
    pub fn intersections(&self, footprint: &Rect) -> Vec<Intersection<'_>> {
        self.hits(footprint, None)
    }

    /// Rasterize the annotations overlapping `footprint` into a
    /// `width` x `height` mask.
    ///
    /// Single-label masks paint annotations in descending area of their
    /// clipped exterior (holes not subtracted), so smaller annotations stay
    /// visible on top of larger ones, including ones sitting in a hole.
    ///
    /// # Errors
    ///
    /// Fails when the index has more classes than a `u8` mask can hold.
    pub fn mask_for(
        &self,
        footprint: &Rect,
        width: u32,
        height: u32,
        multilabel: bool,
        classes: Option<&[String]>,
    ) -> Result<LabelMask, ConfigurationError> {
        if self.classes.len() > MAX_MASK_CLASSES {
            return Err(ConfigurationError::TooManyClasses(self.classes.len()));
        }

        let hits = self.hits(footprint, classes);

        if multilabel {
            let mut channels = vec![GrayImage::new(width, height); self.classes.len()];
            for hit in &hits {
                let entry = &self.entries[hit.index];
                paint_polygon(&mut channels[entry.class_id - 1], &entry.polygon, footprint, 1);
            }
            return Ok(LabelMask::Multi(channels));
        }

        let mut order: Vec<(f64, &Entry)> = hits
            .iter()
            .map(|hit| {
                let entry = &self.entries[hit.index];
                (entry.polygon.exterior_intersection_area(footprint), entry)
            })
            .collect();
        // Stable sort keeps original order for equal areas
        order.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut mask = GrayImage::new(width, height);
        for (_, entry) in order {
            paint_polygon(&mut mask, &entry.polygon, footprint, entry.class_id as u8);
        }
        Ok(LabelMask::Single(mask))
    }

    /// Overlapping annotations with a positive intersection area, ascending
    /// by original index.
    fn hits(&self, footprint: &Rect, classes: Option<&[String]>) -> Vec<Intersection<'_>> {
        self.candidates(footprint)
            .into_iter()
            .filter_map(|slot| {
                let entry = &self.entries[slot as usize];
                if let Some(classes) = classes {
                    if !classes.iter().any(|c| *c == entry.label) {
                        return None;
                    }
                }
                let area = entry.polygon.intersection_area(footprint);
                (area > 0.0).then_some(Intersection {
                    index: slot as usize,
                    label: entry.label.as_str(),
                    area,
                })
            })
            .collect()
    }

    /// Arena slots whose bounding box overlaps `footprint`, sorted.
    fn candidates(&self, footprint: &Rect) -> Vec<u32> {
        let (x0, y0, x1, y1) = self.bucket_range(footprint);
        let span = (x1 - x0 + 1).saturating_mul(y1 - y0 + 1);

        let mut slots: Vec<u32> = if span > self.buckets.len() as i64 {
            // Footprint larger than the populated grid: scan the arena
            (0..self.entries.len() as u32).collect()
        } else {
            let mut slots = self.oversized.clone();
            for by in y0..=y1 {
                for bx in x0..=x1 {
                    if let Some(bucket) = self.buckets.get(&(bx, by)) {
                        slots.extend_from_slice(bucket);
                    }
                }
            }
            slots.sort_unstable();
            slots.dedup();
            slots
        };

        slots.retain(|&slot| self.entries[slot as usize].bbox.overlaps(footprint));
        slots
    }

    fn bucket_range(&self, rect: &Rect) -> (i64, i64, i64, i64) {
        let key = |v: f64| (v / self.bucket_size).floor() as i64;
        (key(rect.min_x), key(rect.min_y), key(rect.max_x), key(rect.max_y))
    }
}

fn validated(
    position: usize,
    annotation: &Annotation,
) -> Result<(Polygon, Rect), AnnotationGeometryError> {
    let error = |ring: String, defect| AnnotationGeometryError {
        index: position,
        label: annotation.label.clone(),
        ring,
        defect,
    };

    let polygon = annotation.polygon.normalized();
    let rings = std::iter::once(("exterior".to_string(), &polygon.exterior)).chain(
        polygon
            .holes
            .iter()
            .enumerate()
            .map(|(i, hole)| (format!("hole {}", i), hole)),
    );

    for (ring, points) in rings {
        validate_ring(points).map_err(|defect| error(ring, defect))?;
    }

    let bbox = polygon
        .bounding_box()
        .ok_or_else(|| error("exterior".to_string(), GeometryDefect::TooFewVertices))?;
    Ok((polygon, bbox))
}
