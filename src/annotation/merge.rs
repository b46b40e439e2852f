//! Merging of nearby annotations that share a label.
//!
//! Two annotations with the same label are merged when they lie within
//! `2 * max_distance` of each other: growing both by `max_distance` makes
//! them touch. The merged outline is the morphological closing of their
//! union (grow by `max_distance`, shrink back), computed on a raster and
//! traced back to polygons. Annotations with no close neighbour are
//! returned unchanged.

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::error::ConfigurationError;

use super::geometry::Rect;
use super::index::Annotation;
use super::mask::paint_polygon;
use super::trace::trace_mask;

/// Raster cells per `max_distance` when closing a group.
const CELLS_PER_DISTANCE: f64 = 4.0;

/// Upper bound on the raster side used for one group.
const MAX_CANVAS_SIDE: f64 = 4096.0;

fn expanded(rect: &Rect, by: f64) -> Rect {
    Rect::new(rect.min_x - by, rect.min_y - by, rect.max_x + by, rect.max_y + by)
}

fn union(a: &Rect, b: &Rect) -> Rect {
    Rect::new(
        a.min_x.min(b.min_x),
        a.min_y.min(b.min_y),
        a.max_x.max(b.max_x),
        a.max_y.max(b.max_y),
    )
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Same-label groups whose grown bounding boxes chain together, each sorted
/// by annotation index, ordered by their first member.
fn candidate_groups(annotations: &[Annotation], max_distance: f64) -> Vec<Vec<usize>> {
    let boxes: Vec<Option<Rect>> = annotations
        .iter()
        .map(|a| a.polygon.bounding_box().map(|b| expanded(&b, max_distance)))
        .collect();

    let mut order: Vec<usize> = (0..annotations.len()).filter(|&i| boxes[i].is_some()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (boxes[a].map_or(0.0, |r| r.min_x), boxes[b].map_or(0.0, |r| r.min_x));
        a.total_cmp(&b)
    });

    let mut parent: Vec<usize> = (0..annotations.len()).collect();
    let mut active: Vec<usize> = Vec::new();
    for i in order {
        let Some(current) = boxes[i] else { continue };
        active.retain(|&j| boxes[j].is_some_and(|b| b.max_x >= current.min_x));
        for &j in &active {
            let Some(other) = boxes[j] else { continue };
            let close_y = other.min_y <= current.max_y && current.min_y <= other.max_y;
            if close_y && annotations[i].label == annotations[j].label {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                parent[a.max(b)] = a.min(b);
            }
        }
        active.push(i);
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..annotations.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    // Roots are the smallest member, so map order is first-member order
    groups.into_values().collect()
}

/// Close one candidate group on a raster. Returns `(first member, merged)`
/// pairs; members that end up alone are returned as themselves.
fn close_group(
    annotations: &[Annotation],
    members: &[usize],
    max_distance: f64,
) -> Vec<(usize, Annotation)> {
    let keep = |i: usize| (i, annotations[i].clone());
    let Some(bounds) = members
        .iter()
        .filter_map(|&i| annotations[i].polygon.bounding_box())
        .reduce(|a, b| union(&a, &b))
    else {
        return members.iter().map(|&i| keep(i)).collect();
    };

    let span = bounds.width().max(bounds.height()) + 2.0 * max_distance;
    let cell = (max_distance / CELLS_PER_DISTANCE).max(span / (MAX_CANVAS_SIDE - 16.0));
    let radius = (max_distance / cell).round().clamp(1.0, CELLS_PER_DISTANCE) as u8;
    let margin = (radius as f64 + 1.0) * cell;
    let width = ((bounds.width() + 2.0 * margin) / cell).ceil() as u32;
    let height = ((bounds.height() + 2.0 * margin) / cell).ceil() as u32;
    let footprint = Rect::from_origin(
        bounds.min_x - margin,
        bounds.min_y - margin,
        width as f64 * cell,
        height as f64 * cell,
    );

    let mut union_mask = GrayImage::new(width, height);
    let mut seeds: Vec<(usize, Option<(u32, u32)>)> = Vec::with_capacity(members.len());
    for &i in members {
        let mut scratch = GrayImage::new(width, height);
        paint_polygon(&mut scratch, &annotations[i].polygon, &footprint, u8::MAX);
        let mut seed = None;
        for (x, y, pixel) in scratch.enumerate_pixels() {
            if pixel.0[0] != 0 {
                union_mask.put_pixel(x, y, Luma([u8::MAX]));
                seed.get_or_insert((x, y));
            }
        }
        seeds.push((i, seed));
    }

    let closed = close(&union_mask, Norm::LInf, radius);
    let components = connected_components(&closed, Connectivity::Four, Luma([0u8]));

    let mut by_component: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    let mut out = Vec::new();
    for (i, seed) in seeds {
        match seed {
            Some((x, y)) => by_component
                .entry(components.get_pixel(x, y).0[0])
                .or_default()
                .push(i),
            // Too small to rasterize
            None => out.push(keep(i)),
        }
    }

    for (component, merged) in by_component {
        if merged.len() == 1 {
            out.push(keep(merged[0]));
            continue;
        }
        let binary = GrayImage::from_fn(width, height, |x, y| {
            Luma([u8::from(components.get_pixel(x, y).0[0] == component)])
        });
        let label = &annotations[merged[0]].label;
        debug!(label = %label, annotations = merged.len(), "Merging nearby annotations");
        for polygon in trace_mask(&binary, &footprint) {
            out.push((merged[0], Annotation::new(label.clone(), polygon)));
        }
    }
    out
}

/// Merge annotations of the same label lying within `2 * max_distance` of
/// each other.
///
/// The result keeps the input order: a merged annotation takes the place of
/// its first member.
///
/// # Errors
///
/// Fails when `max_distance` is not a positive finite number.
pub fn merge_near(
    annotations: &[Annotation],
    max_distance: f64,
) -> Result<Vec<Annotation>, ConfigurationError> {
    if !(max_distance.is_finite() && max_distance > 0.0) {
        return Err(ConfigurationError::InvalidMergeDistance(max_distance));
    }

    let mut out: Vec<(usize, Annotation)> = Vec::with_capacity(annotations.len());
    for members in candidate_groups(annotations, max_distance) {
        if let [only] = members[..] {
            out.push((only, annotations[only].clone()));
        } else {
            out.extend(close_group(annotations, &members, max_distance));
        }
    }
    out.sort_by_key(|(first, _)| *first);

    debug!(
        before = annotations.len(),
        after = out.len(),
        "Merged nearby annotations"
    );
    Ok(out.into_iter().map(|(_, annotation)| annotation).collect())
}
