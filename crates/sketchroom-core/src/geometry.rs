//! Stroke geometry and smoothing.
//!
//! Everything here works in surface-local logical coordinates and produces
//! `kurbo` paths. Renderers turn these outlines into pixels.

use kurbo::{BezPath, Circle, Point, Rect, Shape};

/// Fraction of the inter-point vector used to place smoothing controls.
pub const SMOOTHING_TENSION: f64 = 0.5;

/// Flattening tolerance for curved outlines (circles, dabs).
const PATH_TOLERANCE: f64 = 0.1;

/// Tolerance for a circle of `radius`: fixed for on-screen sizes, growing
/// with the radius so the element count stays bounded.
fn circle_tolerance(radius: f64) -> f64 {
    (radius * 1.0e-4).max(PATH_TOLERANCE)
}

/// Synthesize a pair of Bezier control points for every consecutive pair of
/// points.
///
/// For a pair `(p, q)` with `d = q - p` the controls are `p + d * tension`
/// and `q - d * tension`.
pub fn control_points(points: &[Point], tension: f64) -> Vec<(Point, Point)> {
    points
        .windows(2)
        .map(|pair| {
            let (curr, next) = (pair[0], pair[1]);
            let d = next - curr;
            (curr + d * tension, next - d * tension)
        })
        .collect()
}

/// Build a smooth curve through the given raw points.
///
/// One cubic segment connects each original point to the next through the
/// synthesized controls. Returns `None` when fewer than two points are given.
pub fn smooth_path(points: &[Point]) -> Option<BezPath> {
    if points.len() < 2 {
        return None;
    }

    let mut path = BezPath::new();
    path.move_to(points[0]);
    for ((cp1, cp2), end) in control_points(points, SMOOTHING_TENSION)
        .into_iter()
        .zip(&points[1..])
    {
        path.curve_to(cp1, cp2, *end);
    }
    Some(path)
}

/// Straight segment between two points (pen segments and lines).
pub fn segment_path(start: Point, end: Point) -> BezPath {
    let mut path = BezPath::new();
    path.move_to(start);
    path.line_to(end);
    path
}

/// Axis-aligned rectangle with `anchor` and `current` as opposite corners.
///
/// The drag may go in any direction; the rectangle is normalized.
pub fn rectangle_path(anchor: Point, current: Point) -> BezPath {
    Rect::from_points(anchor, current).to_path(PATH_TOLERANCE)
}

/// Circle centered at `center` passing through `edge`.
pub fn circle_path(center: Point, edge: Point) -> BezPath {
    let radius = center.distance(edge);
    Circle::new(center, radius).to_path(circle_tolerance(radius))
}

/// Filled disc used by eraser dabs.
pub fn dab_path(center: Point, radius: f64) -> BezPath {
    let radius = radius.max(0.0);
    Circle::new(center, radius).to_path(circle_tolerance(radius))
}
