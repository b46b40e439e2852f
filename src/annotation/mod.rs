//! Annotation handling.
//!
//! - [`geometry`]: points, rectangles and polygons with holes, clipping and
//!   area computations
//! - [`AnnotationIndex`]: bucketed spatial index answering per-tile label and
//!   mask queries
//! - [`load_geojson`] / [`save_geojson`]: GeoJSON FeatureCollection reader
//!   and writer
//! - [`mask_to_annotations`]: traces label masks back into polygons
//! - [`merge_near`]: merges same-label annotations lying close together
//!
//! All geometry here lives in annotation space. The tile stream converts tile
//! footprints into annotation space before querying the index.

pub mod geometry;
mod geojson;
mod index;
mod mask;
mod merge;
mod trace;

pub use geojson::{load_geojson, parse_geojson, save_geojson, to_geojson};
pub use geometry::{Point, Polygon, Rect};
pub use index::{Annotation, AnnotationIndex, Intersection, DEFAULT_BUCKET_SIZE};
pub use mask::{LabelMask, MaskMode, MAX_MASK_CLASSES};
pub use merge::merge_near;
pub use trace::{mask_to_annotations, trace_mask};
