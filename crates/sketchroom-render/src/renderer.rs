//! Renderer trait abstraction.

use sketchroom_core::Operation;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("surface size {width}x{height} is not drawable")]
    InvalidSize { width: u32, height: u32 },
    #[error("device pixel ratio must be positive, got {0}")]
    InvalidScale(f64),
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Trait for rasterizing backends.
///
/// A renderer turns operations into pixels, one at a time and in order. It
/// holds no drawing state of its own beyond the pixels, so any log can be
/// reproduced by [`replay`](Renderer::replay).
pub trait Renderer {
    /// Reset every pixel to transparent.
    fn clear(&mut self);

    /// Draw one operation on top of the current pixels.
    fn draw_operation(&mut self, op: &Operation);

    /// Clear and draw `ops` in order.
    fn replay(&mut self, ops: &[Operation]) {
        self.clear();
        for op in ops {
            self.draw_operation(op);
        }
    }
}
