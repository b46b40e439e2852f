//! Planar geometry for annotation polygons.
//!
//! Everything here works in annotation space (`f64`). Rectangles are
//! axis-aligned and half-open in spirit: a rectangle that only touches a
//! polygon along an edge has zero intersection area.

use crate::error::GeometryDefect;

/// Relative tolerance under which a ring's area counts as zero.
const AREA_EPSILON: f64 = 1e-12;

// =============================================================================
// Point / Rect
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Rectangle from an origin and a size.
    pub fn from_origin(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Whether the interiors of the two rectangles overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Bounding box of a set of points.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut rect = Self::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            rect.min_x = rect.min_x.min(p.x);
            rect.min_y = rect.min_y.min(p.y);
            rect.max_x = rect.max_x.max(p.x);
            rect.max_y = rect.max_y.max(p.y);
        }
        Some(rect)
    }
}

// =============================================================================
// Polygon
// =============================================================================

/// A simple polygon with optional interior rings (holes).
///
/// Rings are stored open (no repeated closing vertex) once the polygon has
/// been through [`Polygon::normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> Self {
        Self { exterior, holes }
    }

    /// Axis-aligned rectangular polygon.
    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(vec![
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        ])
    }

    /// Copy with closing vertices and consecutive duplicates removed.
    pub fn normalized(&self) -> Self {
        Self {
            exterior: normalize_ring(&self.exterior),
            holes: self.holes.iter().map(|h| normalize_ring(h)).collect(),
        }
    }

    /// Area of the exterior minus the holes.
    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_area(h)).sum();
        (ring_area(&self.exterior) - holes).max(0.0)
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        Rect::bounding(&self.exterior)
    }

    /// Area of the part of the exterior inside `rect`, holes ignored.
    pub fn exterior_intersection_area(&self, rect: &Rect) -> f64 {
        ring_area(&clip_ring(&self.exterior, rect))
    }

    /// Area of the part of the polygon inside `rect`.
    pub fn intersection_area(&self, rect: &Rect) -> f64 {
        let exterior = ring_area(&clip_ring(&self.exterior, rect));
        if exterior <= 0.0 {
            return 0.0;
        }
        let holes: f64 = self
            .holes
            .iter()
            .map(|h| ring_area(&clip_ring(h, rect)))
            .sum();
        (exterior - holes).max(0.0)
    }
}

// =============================================================================
// Ring helpers
// =============================================================================

/// Drop consecutive duplicate vertices and the closing vertex.
pub fn normalize_ring(ring: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(ring.len());
    for &p in ring {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Absolute shoelace area of a ring.
pub fn ring_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    (twice / 2.0).abs()
}

/// Check one ring for the defects that make area computations meaningless.
///
/// The ring must already be normalized.
pub fn validate_ring(ring: &[Point]) -> Result<(), GeometryDefect> {
    if !ring.iter().all(Point::is_finite) {
        return Err(GeometryDefect::NonFiniteCoordinate);
    }
    if ring.len() < 3 {
        return Err(GeometryDefect::TooFewVertices);
    }

    if is_self_intersecting(ring) {
        return Err(GeometryDefect::SelfIntersecting);
    }

    let scale = Rect::bounding(ring).map_or(0.0, |b| b.area());
    if ring_area(ring) <= AREA_EPSILON * scale.max(1.0) {
        return Err(GeometryDefect::ZeroArea);
    }
    Ok(())
}

/// Sweep over edges sorted by their left end. Only edges whose x-range is
/// still open are compared, and pairs with disjoint y-ranges are skipped.
fn is_self_intersecting(ring: &[Point]) -> bool {
    let n = ring.len();
    let edge = |i: usize| (ring[i], ring[(i + 1) % n]);
    let adjacent = |i: usize, j: usize| (i + 1) % n == j || (j + 1) % n == i;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        let (a, b) = edge(i);
        let (c, d) = edge(j);
        a.x.min(b.x).total_cmp(&c.x.min(d.x))
    });

    let mut active: Vec<usize> = Vec::new();
    for i in order {
        let (a, b) = edge(i);
        let (min_x, min_y, max_y) = (a.x.min(b.x), a.y.min(b.y), a.y.max(b.y));
        active.retain(|&j| {
            let (c, d) = edge(j);
            c.x.max(d.x) >= min_x
        });

        for &j in &active {
            if adjacent(i, j) {
                continue;
            }
            let (c, d) = edge(j);
            if c.y.max(d.y) < min_y || c.y.min(d.y) > max_y {
                continue;
            }
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
        active.push(i);
    }
    false
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}

/// Sutherland-Hodgman clip of a ring against an axis-aligned rectangle.
///
/// Concave rings may come back with degenerate connecting edges along the
/// rectangle border; those contribute no area.
pub fn clip_ring(ring: &[Point], rect: &Rect) -> Vec<Point> {
    let mut output = ring.to_vec();
    let edges: [(fn(&Point, &Rect) -> bool, Boundary); 4] = [
        (|p, r| p.x >= r.min_x, Boundary::MinX),
        (|p, r| p.x <= r.max_x, Boundary::MaxX),
        (|p, r| p.y >= r.min_y, Boundary::MinY),
        (|p, r| p.y <= r.max_y, Boundary::MaxY),
    ];

    for (inside, boundary) in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        for (i, &current) in input.iter().enumerate() {
            let previous = input[(i + input.len() - 1) % input.len()];
            match (inside(&current, rect), inside(&previous, rect)) {
                (true, true) => output.push(current),
                (true, false) => {
                    output.push(boundary.crossing(previous, current, rect));
                    output.push(current);
                }
                (false, true) => output.push(boundary.crossing(previous, current, rect)),
                (false, false) => {}
            }
        }
    }
    output
}

#[derive(Clone, Copy)]
enum Boundary {
    MinX,
    MaxX,
    MinY,
    MaxY,
}

impl Boundary {
    fn crossing(self, a: Point, b: Point, rect: &Rect) -> Point {
        match self {
            Boundary::MinX | Boundary::MaxX => {
                let x = if matches!(self, Boundary::MinX) { rect.min_x } else { rect.max_x };
                let t = (x - a.x) / (b.x - a.x);
                Point::new(x, a.y + t * (b.y - a.y))
            }
            Boundary::MinY | Boundary::MaxY => {
                let y = if matches!(self, Boundary::MinY) { rect.min_y } else { rect.max_y };
                let t = (y - a.y) / (b.y - a.y);
                Point::new(a.x + t * (b.x - a.x), y)
            }
        }
    }
}

/// X intervals where the horizontal line at `y` is inside a single ring.
pub fn scanline_spans(ring: &[Point], y: f64) -> Vec<(f64, f64)> {
    let n = ring.len();
    let mut crossings = Vec::new();
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        // Half-open in y so shared vertices are counted once
        if (a.y <= y) != (b.y <= y) {
            let t = (y - a.y) / (b.y - a.y);
            crossings.push(a.x + t * (b.x - a.x));
        }
    }
    crossings.sort_by(f64::total_cmp);
    crossings.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}
