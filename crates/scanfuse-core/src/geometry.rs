//! Geometry kernel: point/segment/polygon predicates, polygon
//! rasterization, and the anchor arithmetic that keeps polygon masks
//! attached to their bounding box during interactive edits.
//!
//! Every function here runs on hot interactive paths, so failure semantics
//! are local and silent: malformed input (fewer than 3 vertices, empty
//! slices, zero-size boxes) yields `false`/`None`/empty results, never a
//! panic.

use crate::{AnchorPoints, BoundingBox, MaskVertex, RasterMask, Rect};

/// Turn direction of the ordered triple `p → q → r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

/// Inclusive containment test against an `[x, y, width, height]` rectangle.
pub fn point_in_rect(p: [f64; 2], rect: &Rect) -> bool {
    p[0] >= rect.x
        && p[0] <= rect.x + rect.width
        && p[1] >= rect.y
        && p[1] <= rect.y + rect.height
}

/// Orientation of the ordered triple `p → q → r` from the sign of the
/// cross product `(q - p) × (r - q)`.
pub fn orientation(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> Orientation {
    let cross = (q[1] - p[1]) * (r[0] - q[0]) - (q[0] - p[0]) * (r[1] - q[1]);
    if cross == 0.0 {
        Orientation::Collinear
    } else if cross > 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::CounterClockwise
    }
}

/// Whether `q` lies within the axis-aligned bounding box of segment `p - r`.
///
/// Only meaningful once `p`, `q`, `r` are known to be collinear.
pub fn on_segment(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> bool {
    q[0] <= p[0].max(r[0])
        && q[0] >= p[0].min(r[0])
        && q[1] <= p[1].max(r[1])
        && q[1] >= p[1].min(r[1])
}

/// Whether segments `p1 - q1` and `p2 - q2` intersect, including the
/// degenerate collinear-overlap cases.
pub fn segments_intersect(p1: [f64; 2], q1: [f64; 2], p2: [f64; 2], q2: [f64; 2]) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear special cases: an endpoint of one segment lies on the other.
    (o1 == Orientation::Collinear && on_segment(p1, p2, q1))
        || (o2 == Orientation::Collinear && on_segment(p1, q2, q1))
        || (o3 == Orientation::Collinear && on_segment(p2, p1, q2))
        || (o4 == Orientation::Collinear && on_segment(p2, q1, q2))
}

/// Ray-casting point-in-polygon test.
///
/// Casts a horizontal ray from `p` past the polygon's right extent and
/// counts edge crossings; a point collinear with an edge resolves via
/// [`on_segment`] (boundary points count as inside). Polygons with fewer
/// than 3 vertices contain nothing.
pub fn point_in_polygon(poly: &[[f64; 2]], p: [f64; 2]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    // Ray endpoint derived from the polygon itself, so the test stays valid
    // for any coordinate magnitude.
    let far_x = poly.iter().map(|v| v[0]).fold(p[0], f64::max) + 1.0;
    let extreme = [far_x, p[1]];

    let mut count = 0usize;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        if segments_intersect(a, b, p, extreme) {
            if orientation(a, p, b) == Orientation::Collinear {
                return on_segment(a, p, b);
            }
            count += 1;
        }
    }
    count % 2 == 1
}

/// Rasterize a polygon into a binary mask over its integer bounding box.
///
/// The box is `floor(min)..=floor(max)` on both axes (asymmetric rounding
/// kept for compatibility with existing masks). Each integer grid cell in
/// the box is tested with [`point_in_polygon`], so cost is
/// O(vertices × area) — fine for the small local masks this tool edits,
/// pathological for image-sized polygons.
///
/// Returns `None` for degenerate input (fewer than 3 vertices).
pub fn polygon_to_binary_mask(coords: &[[f64; 2]]) -> Option<RasterMask> {
    if coords.len() < 3 {
        return None;
    }

    let min_x = coords.iter().map(|c| c[0]).fold(f64::INFINITY, f64::min);
    let min_y = coords.iter().map(|c| c[1]).fold(f64::INFINITY, f64::min);
    let max_x = coords.iter().map(|c| c[0]).fold(f64::NEG_INFINITY, f64::max);
    let max_y = coords.iter().map(|c| c[1]).fold(f64::NEG_INFINITY, f64::max);
    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return None;
    }

    let x0 = min_x.floor() as i32;
    let y0 = min_y.floor() as i32;
    let x1 = max_x.floor() as i32;
    let y1 = max_y.floor() as i32;

    let width = (x1 - x0 + 1).max(0) as u32;
    let height = (y1 - y0 + 1).max(0) as u32;

    let mut bitmap = Vec::with_capacity((width * height) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let inside = point_in_polygon(coords, [x as f64, y as f64]);
            bitmap.push(inside as u8);
        }
    }

    Some(RasterMask {
        bitmap,
        origin: [x0, y0],
        extent: [width, height],
    })
}

/// Bounding rectangle of a polygon in `[xMin, yMin, width, height]` form.
///
/// Returns `None` on empty input.
pub fn polygon_bounding_rect(coords: &[[f64; 2]]) -> Option<Rect> {
    let first = coords.first()?;
    let (mut min_x, mut min_y) = (first[0], first[1]);
    let (mut max_x, mut max_y) = (first[0], first[1]);
    for c in &coords[1..] {
        min_x = min_x.min(c[0]);
        min_y = min_y.min(c[1]);
        max_x = max_x.max(c[0]);
        max_y = max_y.max(c[1]);
    }
    Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Recompute each vertex's four-edge percentage anchors from the current
/// box. Called after a vertex is dragged or a mask is first ingested.
///
/// Returns new vertices; the input is never mutated. A zero-size box
/// yields zeroed anchors.
pub fn mask_anchor_points(bbox: &BoundingBox, verts: &[MaskVertex]) -> Vec<MaskVertex> {
    let b = bbox.normalized();
    let w = b.width();
    let h = b.height();
    verts
        .iter()
        .map(|v| {
            let anchor = if w > 0.0 && h > 0.0 {
                AnchorPoints {
                    top: (v.y - b.y1) / h * 100.0,
                    bottom: (b.y2 - v.y) / h * 100.0,
                    left: (v.x - b.x1) / w * 100.0,
                    right: (b.x2 - v.x) / w * 100.0,
                }
            } else {
                AnchorPoints::default()
            };
            MaskVertex {
                x: v.x,
                y: v.y,
                anchor,
            }
        })
        .collect()
}

/// Regenerate vertex positions from previously computed anchors against a
/// (possibly resized/moved) box, so the mask scales and moves with the box.
///
/// Boundary rule: an anchor of exactly 0 against the right (resp. bottom)
/// edge pins the vertex to `x2` (resp. `y2`); an anchor of 0 against the
/// left (resp. top) edge pins to `x1` (resp. `y1`); otherwise the position
/// interpolates from the left/top anchor percentage. Anchors are carried
/// over unchanged — they remain valid for the new box by construction.
pub fn polygon_from_anchors(bbox: &BoundingBox, verts: &[MaskVertex]) -> Vec<MaskVertex> {
    let b = bbox.normalized();
    let w = b.width();
    let h = b.height();
    verts
        .iter()
        .map(|v| {
            let x = if v.anchor.right == 0.0 {
                b.x2
            } else if v.anchor.left == 0.0 {
                b.x1
            } else {
                b.x1 + v.anchor.left / 100.0 * w
            };
            let y = if v.anchor.bottom == 0.0 {
                b.y2
            } else if v.anchor.top == 0.0 {
                b.y1
            } else {
                b.y1 + v.anchor.top / 100.0 * h
            };
            MaskVertex {
                x,
                y,
                anchor: v.anchor,
            }
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────
