//! CPU raster surface backed by a `tiny-skia` pixmap.
//!
//! Surfaces are addressed in logical units; the device pixel ratio is folded
//! into the draw transform so a 300x200 surface at 2x is a 600x400 pixmap.

use kurbo::{BezPath, PathEl, Point, Size};
use peniko::color::{AlphaColor, Srgb, parse_color};
use sketchroom_core::tools::{DEFAULT_COLOR, Preview};
use sketchroom_core::{Operation, ToolKind, geometry};
use tiny_skia::{
    BlendMode, Color, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap,
    PremultipliedColorU8, Stroke, Transform,
};

use crate::renderer::{RenderResult, Renderer, RendererError};

/// Parse a CSS color string (`#rgb`, `#rrggbb`, `rgb()`, `hsl()`, named).
pub fn parse_css_color(css: &str) -> Option<Color> {
    let color: AlphaColor<Srgb> = parse_color(css.trim()).ok()?.to_alpha_color();
    let rgba = color.to_rgba8();
    Some(Color::from_rgba8(rgba.r, rgba.g, rgba.b, rgba.a))
}

fn color_or_default(css: &str) -> Color {
    parse_css_color(css).unwrap_or_else(|| {
        log::debug!("unparseable color {css:?}, using default");
        parse_css_color(DEFAULT_COLOR).unwrap_or(Color::WHITE)
    })
}

/// Convert a kurbo path to a tiny-skia path. `None` for empty or degenerate paths.
pub(crate) fn to_skia_path(path: &BezPath) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => builder.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => builder.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(c, p) => builder.quad_to(c.x as f32, c.y as f32, p.x as f32, p.y as f32),
            PathEl::CurveTo(c1, c2, p) => builder.cubic_to(
                c1.x as f32,
                c1.y as f32,
                c2.x as f32,
                c2.y as f32,
                p.x as f32,
                p.y as f32,
            ),
            PathEl::ClosePath => builder.close(),
        }
    }
    builder.finish()
}

fn round_stroke(width: f64) -> Stroke {
    Stroke {
        width: width as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    }
}

/// A drawable pixel buffer of a fixed logical size.
pub struct Surface {
    pixmap: Pixmap,
    logical: Size,
    dpr: f64,
}

impl Surface {
    /// Create a transparent surface of `logical` size at `dpr` device pixels per unit.
    pub fn new(logical: Size, dpr: f64) -> RenderResult<Self> {
        if !(dpr.is_finite() && dpr > 0.0) {
            return Err(RendererError::InvalidScale(dpr));
        }
        let width = (logical.width * dpr).round().max(0.0) as u32;
        let height = (logical.height * dpr).round().max(0.0) as u32;
        let pixmap =
            Pixmap::new(width, height).ok_or(RendererError::InvalidSize { width, height })?;
        Ok(Self {
            pixmap,
            logical,
            dpr,
        })
    }

    pub fn logical_size(&self) -> Size {
        self.logical
    }

    pub fn dpr(&self) -> f64 {
        self.dpr
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Logical-to-device transform.
    pub fn transform(&self) -> Transform {
        Transform::from_scale(self.dpr as f32, self.dpr as f32)
    }

    /// Stroke an outline with round caps and joins.
    pub fn stroke_path(&mut self, path: &BezPath, color: Color, width: f64) {
        let Some(path) = to_skia_path(path) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        let transform = self.transform();
        self.pixmap
            .stroke_path(&path, &paint, &round_stroke(width), transform, None);
    }

    /// Fill an outline.
    pub fn fill_path(&mut self, path: &BezPath, color: Color) {
        self.fill_with(path, color, BlendMode::SourceOver);
    }

    /// Remove pixels inside an outline.
    pub fn erase_path(&mut self, path: &BezPath) {
        self.fill_with(path, Color::BLACK, BlendMode::DestinationOut);
    }

    fn fill_with(&mut self, path: &BezPath, color: Color, blend_mode: BlendMode) {
        let Some(path) = to_skia_path(path) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        paint.blend_mode = blend_mode;
        let transform = self.transform();
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, transform, None);
    }

    /// Draw a provisional preview.
    pub fn draw_preview(&mut self, preview: &Preview) {
        match preview {
            Preview::Stroke {
                points,
                color,
                width,
            } => {
                if let Some(path) = geometry::smooth_path(points) {
                    self.stroke_path(&path, color_or_default(color), *width);
                }
            }
            Preview::Shape(op) => self.draw_operation(op),
        }
    }

    /// Pixel under a logical point, if inside the surface.
    pub fn pixel_at(&self, point: Point) -> Option<PremultipliedColorU8> {
        if point.x < 0.0 || point.y < 0.0 {
            return None;
        }
        let x = (point.x * self.dpr).floor() as u32;
        let y = (point.y * self.dpr).floor() as u32;
        self.pixmap.pixel(x, y)
    }

    /// Whether every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixmap.pixels().iter().all(|p| p.alpha() == 0)
    }
}

impl Renderer for Surface {
    fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }

    fn draw_operation(&mut self, op: &Operation) {
        let Some(outline) = op.outline() else {
            log::debug!("skipping {:?} operation without outline", op.tool);
            return;
        };
        match op.tool {
            ToolKind::Eraser => self.erase_path(&outline),
            _ => self.stroke_path(&outline, color_or_default(&op.color), op.width),
        }
    }
}
