//! Sketchroom Render Library
//!
//! Rasterizes operation logs onto CPU surfaces with `tiny-skia`. The
//! pipeline keeps a committed layer in step with a session's log and an
//! overlay for the local preview and remote cursors.

mod pipeline;
mod renderer;
mod surface;

pub use pipeline::{DEFAULT_BACKGROUND, MARKER_RADIUS, PULSE_RADIUS, Pipeline};
pub use renderer::{RenderResult, Renderer, RendererError};
pub use surface::{Surface, parse_css_color};
