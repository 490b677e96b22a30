//! Pointer input events for the drawing surface.

use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};

// Use web_time for WASM compatibility
#[cfg(target_arch = "wasm32")]
pub use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
pub use std::time::Instant;

/// Pointer event type for unified mouse/touch/pen handling.
///
/// Positions are in surface-local logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down { position: Point },
    Move { position: Point },
    Up { position: Point },
    /// Pointer left the surface; ends any gesture in progress.
    Leave { position: Point },
}

impl PointerEvent {
    /// Position carried by the event.
    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { position }
            | PointerEvent::Move { position }
            | PointerEvent::Up { position }
            | PointerEvent::Leave { position } => position,
        }
    }
}

/// Convert a surface-local point to percent-of-viewport coordinates.
///
/// Returns the origin when the viewport has no area.
pub fn viewport_percent(point: Point, viewport: Size) -> Point {
    if viewport.width <= 0.0 || viewport.height <= 0.0 {
        return Point::ZERO;
    }
    Point::new(
        point.x / viewport.width * 100.0,
        point.y / viewport.height * 100.0,
    )
}
