//! Drawing operations: the immutable, broadcastable units of a drawing.

use kurbo::{BezPath, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry;

/// Multiplier applied to an eraser's nominal width to get the dab radius.
///
/// Applied wherever an eraser operation is rendered, local or remote.
pub const ERASER_RADIUS_FACTOR: f64 = 5.0;

/// Largest accepted stroke width.
pub const MAX_WIDTH: f64 = 500.0;

/// Largest accepted absolute coordinate, in logical units.
pub const MAX_COORDINATE: f64 = 1.0e6;

/// Drawing tools. Each one produces a distinct kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Freehand pen; produces two-point segments.
    #[default]
    Pen,
    /// Destructive eraser; produces single-point dabs.
    Eraser,
    Rectangle,
    Circle,
    Line,
}

impl ToolKind {
    /// All tools in toolbar order.
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Pen,
        ToolKind::Eraser,
        ToolKind::Rectangle,
        ToolKind::Circle,
        ToolKind::Line,
    ];

    /// Number of points an operation of this kind carries.
    pub fn point_count(self) -> usize {
        match self {
            ToolKind::Eraser => 1,
            _ => 2,
        }
    }

    /// Whether the tool draws a drag-to-size shape with a provisional preview.
    pub fn is_shape(self) -> bool {
        matches!(self, ToolKind::Rectangle | ToolKind::Circle | ToolKind::Line)
    }

    /// Display name for this tool.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Pen => "Pen",
            ToolKind::Eraser => "Eraser",
            ToolKind::Rectangle => "Rectangle",
            ToolKind::Circle => "Circle",
            ToolKind::Line => "Line",
        }
    }
}

/// Reasons an operation is rejected before entering a log.
#[derive(Debug, Error, PartialEq)]
pub enum OperationError {
    #[error("{tool:?} operation needs {expected} point(s), got {actual}")]
    PointCount {
        tool: ToolKind,
        expected: usize,
        actual: usize,
    },
    #[error("width must be positive and at most 500, got {0}")]
    Width(f64),
    #[error("non-finite coordinate")]
    NonFinite,
    #[error("coordinate out of range")]
    OutOfRange,
}

/// Identity stamped onto locally authored operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    /// Relay-assigned connection identifier (empty until welcomed).
    pub id: String,
    pub name: String,
}

/// One committed drawing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub tool: ToolKind,
    /// CSS color string. Ignored for eraser dabs.
    #[serde(default)]
    pub color: String,
    /// Stroke width, or nominal eraser width.
    pub width: f64,
    pub points: Vec<Point>,
    /// Connection identifier of the author.
    #[serde(default)]
    pub author_id: String,
    /// Display name of the author at the time of drawing.
    #[serde(default)]
    pub author_name: String,
}

impl Operation {
    /// Create an operation authored by `author`.
    pub fn new(
        tool: ToolKind,
        color: impl Into<String>,
        width: f64,
        points: Vec<Point>,
        author: &Author,
    ) -> Self {
        Self {
            tool,
            color: color.into(),
            width,
            points,
            author_id: author.id.clone(),
            author_name: author.name.clone(),
        }
    }

    /// Check arity, width and coordinates.
    ///
    /// Width and coordinates are bounded so that outlines stay cheap to build.
    pub fn validate(&self) -> Result<(), OperationError> {
        let expected = self.tool.point_count();
        if self.points.len() != expected {
            return Err(OperationError::PointCount {
                tool: self.tool,
                expected,
                actual: self.points.len(),
            });
        }
        if !(self.width.is_finite() && self.width > 0.0 && self.width <= MAX_WIDTH) {
            return Err(OperationError::Width(self.width));
        }
        if self.points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(OperationError::NonFinite);
        }
        if self
            .points
            .iter()
            .any(|p| p.x.abs() > MAX_COORDINATE || p.y.abs() > MAX_COORDINATE)
        {
            return Err(OperationError::OutOfRange);
        }
        Ok(())
    }

    /// Radius of the disc removed by an eraser dab.
    pub fn eraser_radius(&self) -> f64 {
        self.width * ERASER_RADIUS_FACTOR
    }

    /// Outline to rasterize for this operation.
    ///
    /// Eraser outlines are the filled disc; everything else is stroked.
    /// Returns `None` when the operation lacks the points it needs.
    pub fn outline(&self) -> Option<BezPath> {
        match (self.tool, self.points.as_slice()) {
            (ToolKind::Eraser, [center, ..]) => {
                Some(geometry::dab_path(*center, self.eraser_radius()))
            }
            (ToolKind::Pen | ToolKind::Line, [start, end, ..]) => {
                Some(geometry::segment_path(*start, *end))
            }
            (ToolKind::Rectangle, [anchor, current, ..]) => {
                Some(geometry::rectangle_path(*anchor, *current))
            }
            (ToolKind::Circle, [center, edge, ..]) => Some(geometry::circle_path(*center, *edge)),
            _ => None,
        }
    }
}
