//! Label masks back to polygons.
//!
//! Boundaries are traced with marching squares over pixel centres, so every
//! ring vertex sits halfway between two pixel centres. Diagonal-only contact
//! between foreground pixels is treated as a separation (4-connectivity),
//! which keeps every traced ring simple and keeps rings from touching.
//! Rings with foreground on their left are exteriors; the others are holes
//! and are attached to the smallest exterior enclosing them.

use std::collections::BTreeMap;

use image::GrayImage;

use super::geometry::{Point, Polygon, Rect};
use super::index::Annotation;
use super::mask::{LabelMask, MAX_MASK_CLASSES};

/// Vertex in doubled pixel-centre units: pixel centre `(px, py)` is
/// `(2 * px, 2 * py)`, so edge midpoints stay integral.
type Key = (i64, i64);

#[derive(Clone, Copy)]
enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Clone, Copy)]
enum Corner {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

/// Segments of one marching-squares cell, each paired with a foreground
/// corner on its side. Bits: top-left 8, top-right 4, bottom-right 2,
/// bottom-left 1.
fn cell_segments(code: u8) -> &'static [(Edge, Edge, Corner)] {
    use Corner::*;
    use Edge::*;
    match code {
        1 => &[(Left, Bottom, BottomLeft)],
        2 => &[(Bottom, Right, BottomRight)],
        3 => &[(Left, Right, BottomLeft)],
        4 => &[(Top, Right, TopRight)],
        5 => &[(Top, Right, TopRight), (Left, Bottom, BottomLeft)],
        6 => &[(Top, Bottom, TopRight)],
        7 => &[(Left, Top, BottomRight)],
        8 => &[(Left, Top, TopLeft)],
        9 => &[(Top, Bottom, TopLeft)],
        10 => &[(Left, Top, TopLeft), (Bottom, Right, BottomRight)],
        11 => &[(Top, Right, BottomLeft)],
        12 => &[(Left, Right, TopLeft)],
        13 => &[(Bottom, Right, TopLeft)],
        14 => &[(Left, Bottom, TopRight)],
        _ => &[],
    }
}

fn edge_key(edge: Edge, cx: i64, cy: i64) -> Key {
    match edge {
        Edge::Top => (2 * cx + 1, 2 * cy),
        Edge::Right => (2 * cx + 2, 2 * cy + 1),
        Edge::Bottom => (2 * cx + 1, 2 * cy + 2),
        Edge::Left => (2 * cx, 2 * cy + 1),
    }
}

fn corner_key(corner: Corner, cx: i64, cy: i64) -> Key {
    match corner {
        Corner::TopLeft => (2 * cx, 2 * cy),
        Corner::TopRight => (2 * cx + 2, 2 * cy),
        Corner::BottomRight => (2 * cx + 2, 2 * cy + 2),
        Corner::BottomLeft => (2 * cx, 2 * cy + 2),
    }
}

fn cross(o: Key, a: Key, b: Key) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Twice the signed area, in doubled units.
fn signed_area(ring: &[Key]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

fn contains(ring: &[Key], point: Key) -> bool {
    let (x, y) = (point.0 as f64, point.1 as f64);
    let n = ring.len();
    let mut inside = false;
    for i in 0..n {
        let (a, b) = (ring[i], ring[(i + 1) % n]);
        let (ax, ay, bx, by) = (a.0 as f64, a.1 as f64, b.0 as f64, b.1 as f64);
        if (ay > y) != (by > y) && x < ax + (y - ay) / (by - ay) * (bx - ax) {
            inside = !inside;
        }
    }
    inside
}

/// Directed boundary segments keyed by their start vertex.
fn boundary_segments(mask: &GrayImage) -> BTreeMap<Key, Key> {
    let (width, height) = (mask.width() as i64, mask.height() as i64);
    let foreground = |x: i64, y: i64| {
        x >= 0 && y >= 0 && x < width && y < height && mask.get_pixel(x as u32, y as u32).0[0] != 0
    };

    let mut next = BTreeMap::new();
    for cy in -1..height {
        for cx in -1..width {
            let code = (foreground(cx, cy) as u8) << 3
                | (foreground(cx + 1, cy) as u8) << 2
                | (foreground(cx + 1, cy + 1) as u8) << 1
                | foreground(cx, cy + 1) as u8;
            for &(from, to, corner) in cell_segments(code) {
                let (mut a, mut b) = (edge_key(from, cx, cy), edge_key(to, cx, cy));
                if cross(a, b, corner_key(corner, cx, cy)) < 0 {
                    std::mem::swap(&mut a, &mut b);
                }
                // Row-major keys so rings come out top to bottom
                next.insert((a.1, a.0), (b.1, b.0));
            }
        }
    }
    next
}

/// Chain segments into closed rings, dropping vertices in the middle of
/// straight runs.
fn link_rings(mut next: BTreeMap<Key, Key>) -> Vec<Vec<Key>> {
    let mut rings = Vec::new();
    while let Some((start, mut current)) = next.pop_first() {
        let mut ring = vec![(start.1, start.0)];
        let mut closed = false;
        while let Some(following) = next.remove(&current) {
            ring.push((current.1, current.0));
            current = following;
            if current == start {
                closed = true;
                break;
            }
        }
        if !closed {
            continue;
        }

        let n = ring.len();
        let simplified: Vec<Key> = (0..n)
            .filter(|&i| cross(ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]) != 0)
            .map(|i| ring[i])
            .collect();
        if simplified.len() >= 3 {
            rings.push(simplified);
        }
    }
    rings
}

/// Trace the non-zero pixels of `mask` into polygons.
///
/// `footprint` is the annotation-space rectangle covered by the whole mask,
/// as in [`AnnotationIndex::mask_for`](super::AnnotationIndex::mask_for).
pub fn trace_mask(mask: &GrayImage, footprint: &Rect) -> Vec<Polygon> {
    if mask.width() == 0 || mask.height() == 0 {
        return Vec::new();
    }
    let scale_x = footprint.width() / mask.width() as f64;
    let scale_y = footprint.height() / mask.height() as f64;
    let to_point = |(x, y): Key| {
        Point::new(
            footprint.min_x + (x as f64 / 2.0 + 0.5) * scale_x,
            footprint.min_y + (y as f64 / 2.0 + 0.5) * scale_y,
        )
    };

    let (exteriors, holes): (Vec<Vec<Key>>, Vec<Vec<Key>>) = link_rings(boundary_segments(mask))
        .into_iter()
        .partition(|ring| signed_area(ring) > 0);

    let mut polygons: Vec<Polygon> = exteriors
        .iter()
        .map(|ring| Polygon::new(ring.iter().copied().map(to_point).collect()))
        .collect();

    for hole in &holes {
        let owner = exteriors
            .iter()
            .enumerate()
            .filter(|(_, ring)| contains(ring, hole[0]))
            .min_by_key(|(_, ring)| signed_area(ring))
            .map(|(i, _)| i);
        if let Some(owner) = owner {
            polygons[owner]
                .holes
                .push(hole.iter().copied().map(to_point).collect());
        }
    }
    polygons
}

/// Convert a tile's label mask into labeled annotations.
///
/// Class id `i` maps to `classes[i - 1]`. Polygons smaller than `min_area`
/// (annotation-space units) are dropped.
pub fn mask_to_annotations(
    mask: &LabelMask,
    classes: &[String],
    footprint: &Rect,
    min_area: f64,
) -> Vec<Annotation> {
    let mut annotations = Vec::new();
    let mut push = |label: &str, binary: &GrayImage| {
        for polygon in trace_mask(binary, footprint) {
            if polygon.area() >= min_area {
                annotations.push(Annotation::new(label, polygon));
            }
        }
    };

    match mask {
        LabelMask::Single(mask) => {
            for (i, label) in classes.iter().enumerate().take(MAX_MASK_CLASSES) {
                let value = (i + 1) as u8;
                if !mask.pixels().any(|p| p.0[0] == value) {
                    continue;
                }
                let binary = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
                    image::Luma([u8::from(mask.get_pixel(x, y).0[0] == value)])
                });
                push(label.as_str(), &binary);
            }
        }
        LabelMask::Multi(channels) => {
            for (channel, label) in channels.iter().zip(classes) {
                push(label.as_str(), channel);
            }
        }
    }
    annotations
}
