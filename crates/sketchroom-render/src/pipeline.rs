//! Render pipeline: keeps pixels in step with a session.
//!
//! Two layers are kept. The committed layer is a cache of the operation log;
//! the overlay holds the local preview and remote cursor markers and is
//! redrawn from scratch whenever either changes. Compositing stacks both on
//! the background.

use kurbo::{Circle, Point, Shape, Size};
use sketchroom_core::{CursorMarker, OrderingPolicy, Preview, RenderDirective, RoomSession};
use tiny_skia::{Color, Pixmap, PixmapPaint, Transform};

use crate::renderer::{RenderResult, Renderer, RendererError};
use crate::surface::{Surface, parse_css_color};

/// Canvas background behind all layers.
pub const DEFAULT_BACKGROUND: &str = "#171717";
/// Radius of a remote cursor's color swatch.
pub const MARKER_RADIUS: f64 = 6.0;
/// Radius of the ring drawn around a cursor while its owner draws.
pub const PULSE_RADIUS: f64 = 11.0;

pub struct Pipeline {
    committed: Surface,
    overlay: Surface,
    preview: Option<Preview>,
    markers: Vec<CursorMarker>,
    background: Color,
    full_replays: u64,
}

impl Pipeline {
    /// Create empty layers of `logical` size.
    pub fn new(logical: Size, dpr: f64) -> RenderResult<Self> {
        Ok(Self {
            committed: Surface::new(logical, dpr)?,
            overlay: Surface::new(logical, dpr)?,
            preview: None,
            markers: Vec::new(),
            background: parse_css_color(DEFAULT_BACKGROUND).unwrap_or(Color::BLACK),
            full_replays: 0,
        })
    }

    /// Set the background color.
    pub fn with_background(mut self, css: &str) -> Self {
        if let Some(color) = parse_css_color(css) {
            self.background = color;
        }
        self
    }

    pub fn committed(&self) -> &Surface {
        &self.committed
    }

    pub fn overlay(&self) -> &Surface {
        &self.overlay
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    /// Number of full replays performed so far.
    pub fn full_replays(&self) -> u64 {
        self.full_replays
    }

    /// Bring the layers up to date after `directive`.
    pub fn apply<P: OrderingPolicy>(
        &mut self,
        directive: &RenderDirective,
        session: &RoomSession<P>,
    ) {
        match directive {
            RenderDirective::None => {}
            RenderDirective::Append(index) => match session.log().get(*index) {
                Some(op) => self.committed.draw_operation(op),
                None => {
                    log::warn!("append directive for missing index {index}; replaying");
                    self.replay(session);
                }
            },
            RenderDirective::FullReplay => self.replay(session),
            RenderDirective::Clear => {
                self.committed.clear();
                if !session.log().is_empty() {
                    self.replay(session);
                }
            }
            RenderDirective::Preview(preview) => {
                self.preview = preview.clone();
                self.redraw_overlay();
            }
            RenderDirective::Presence => {
                self.markers = session.cursor_markers();
                self.redraw_overlay();
            }
        }
    }

    /// Apply a batch of directives produced since the last render.
    ///
    /// The batch is coalesced first, since every directive is resolved
    /// against the session's current log.
    pub fn apply_all<P: OrderingPolicy>(
        &mut self,
        directives: &[RenderDirective],
        session: &RoomSession<P>,
    ) {
        for directive in RenderDirective::coalesce(directives.to_vec()) {
            self.apply(&directive, session);
        }
    }

    /// Reallocate both layers and reproduce the drawing from the log.
    pub fn resize<P: OrderingPolicy>(
        &mut self,
        logical: Size,
        dpr: f64,
        session: &RoomSession<P>,
    ) -> RenderResult<()> {
        self.committed = Surface::new(logical, dpr)?;
        self.overlay = Surface::new(logical, dpr)?;
        self.replay(session);
        self.markers = session.cursor_markers();
        self.redraw_overlay();
        Ok(())
    }

    fn replay<P: OrderingPolicy>(&mut self, session: &RoomSession<P>) {
        self.committed.replay(session.log().as_slice());
        self.full_replays += 1;
    }

    fn redraw_overlay(&mut self) {
        self.overlay.clear();
        if let Some(preview) = &self.preview {
            self.overlay.draw_preview(preview);
        }
        let size = self.overlay.logical_size();
        for marker in &self.markers {
            draw_marker(&mut self.overlay, marker, size);
        }
    }

    /// Flatten background, committed layer and overlay into one image.
    pub fn composite(&self) -> RenderResult<Pixmap> {
        let source = self.committed.pixmap();
        let (width, height) = (source.width(), source.height());
        let mut out =
            Pixmap::new(width, height).ok_or(RendererError::InvalidSize { width, height })?;
        out.fill(self.background);
        let paint = PixmapPaint::default();
        out.draw_pixmap(0, 0, source.as_ref(), &paint, Transform::identity(), None);
        out.draw_pixmap(
            0,
            0,
            self.overlay.pixmap().as_ref(),
            &paint,
            Transform::identity(),
            None,
        );
        Ok(out)
    }

    /// Export the composited drawing as PNG bytes.
    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        self.composite()?
            .encode_png()
            .map_err(|e| RendererError::Encode(e.to_string()))
    }
}

/// Swatch disc with a light outline, plus a ring while drawing.
fn draw_marker(surface: &mut Surface, marker: &CursorMarker, size: Size) {
    let center = Point::new(
        marker.left / 100.0 * size.width,
        marker.top / 100.0 * size.height,
    );
    let swatch = parse_css_color(&marker.swatch).unwrap_or(Color::WHITE);

    let disc = Circle::new(center, MARKER_RADIUS).to_path(0.1);
    surface.fill_path(&disc, swatch);
    surface.stroke_path(&disc, Color::WHITE, 1.5);

    if marker.pulsing {
        let ring = Circle::new(center, PULSE_RADIUS).to_path(0.1);
        surface.stroke_path(&ring, swatch, 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchroom_core::{
        Author, InboundEvent, Operation, PresenceUpdate, SessionConfig, ToolKind,
    };

    const SIZE: Size = Size::new(200.0, 100.0);

    fn session(name: &str) -> RoomSession {
        RoomSession::new(&SessionConfig::new("room", name))
    }

    fn op(tool: ToolKind, width: f64, points: &[(f64, f64)]) -> Operation {
        Operation::new(
            tool,
            "#3399ff",
            width,
            points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            &Author {
                id: "peer".to_string(),
                name: "Peer".to_string(),
            },
        )
    }

    fn scene() -> Vec<Operation> {
        vec![
            op(ToolKind::Rectangle, 4.0, &[(20.0, 20.0), (90.0, 80.0)]),
            op(ToolKind::Pen, 3.0, &[(10.0, 10.0), (150.0, 60.0)]),
            op(ToolKind::Eraser, 2.0, &[(55.0, 20.0)]),
            op(ToolKind::Circle, 2.0, &[(150.0, 50.0), (170.0, 50.0)]),
            op(ToolKind::Line, 5.0, &[(0.0, 99.0), (199.0, 0.0)]),
        ]
    }

    /// Feed remote operations one at a time, rendering incrementally.
    fn draw_incrementally(ops: &[Operation]) -> (RoomSession, Pipeline) {
        let mut session = session("viewer");
        let mut pipeline = Pipeline::new(SIZE, 1.0).unwrap();
        for op in ops {
            let directive = session.handle_inbound(InboundEvent::Operation(op.clone()));
            pipeline.apply(&directive, &session);
        }
        (session, pipeline)
    }

    fn pixels(pipeline: &Pipeline) -> Vec<u8> {
        pipeline.composite().unwrap().data().to_vec()
    }

    #[test]
    fn test_incremental_matches_full_replay() {
        let (session, mut pipeline) = draw_incrementally(&scene());
        let incremental = pixels(&pipeline);
        assert_eq!(pipeline.full_replays(), 0);

        pipeline.apply(&RenderDirective::FullReplay, &session);
        assert_eq!(pixels(&pipeline), incremental);
        assert_eq!(pipeline.full_replays(), 1);
    }

    #[test]
    fn test_resize_reproduces_drawing() {
        let (session, mut pipeline) = draw_incrementally(&scene());
        pipeline.resize(SIZE, 2.0, &session).unwrap();

        let mut fresh = Pipeline::new(SIZE, 2.0).unwrap();
        fresh.apply(&RenderDirective::FullReplay, &session);

        assert_eq!(pipeline.committed().pixmap().width(), 400);
        assert_eq!(pixels(&pipeline), pixels(&fresh));
    }

    #[test]
    fn test_eraser_is_destructive() {
        let (_, pipeline) = draw_incrementally(&scene());
        // The rectangle's top edge under the dab is gone.
        assert_eq!(
            pipeline.committed().pixel_at(Point::new(55.0, 20.0)).unwrap().alpha(),
            0
        );
        assert_eq!(
            pipeline.committed().pixel_at(Point::new(85.0, 20.0)).unwrap().alpha(),
            255
        );
    }

    #[test]
    fn test_late_joiner_matches_existing_participant() {
        let (existing, existing_pipeline) = draw_incrementally(&scene());

        let mut late = session("late");
        let mut late_pipeline = Pipeline::new(SIZE, 1.0).unwrap();
        let directive = late.handle_inbound(InboundEvent::Snapshot {
            operations: existing.log().as_slice().to_vec(),
            tool_state: None,
        });
        late_pipeline.apply(&directive, &late);

        assert_eq!(pixels(&late_pipeline), pixels(&existing_pipeline));
    }

    #[test]
    fn test_mixed_batch_matches_full_replay() {
        let ops = scene();
        let mut session = session("late");
        let mut pipeline = Pipeline::new(SIZE, 1.0).unwrap();

        // Snapshot and a live operation land in the same poll.
        let batch = vec![
            session.handle_inbound(InboundEvent::Snapshot {
                operations: ops[..3].to_vec(),
                tool_state: None,
            }),
            session.handle_inbound(InboundEvent::Operation(ops[3].clone())),
            session.handle_inbound(InboundEvent::Operation(ops[4].clone())),
        ];
        pipeline.apply_all(&batch, &session);

        let (_, reference) = draw_incrementally(&ops);
        assert_eq!(pixels(&pipeline), pixels(&reference));
        assert_eq!(pipeline.full_replays(), 1);

        // Clear followed by a late operation in one batch.
        let batch = vec![
            session.clear(),
            session.handle_inbound(InboundEvent::Operation(ops[1].clone())),
        ];
        pipeline.apply_all(&batch, &session);
        let (_, reference) = draw_incrementally(&ops[1..2]);
        assert_eq!(pixels(&pipeline), pixels(&reference));
    }

    #[test]
    fn test_non_overlapping_operations_commute() {
        let left = op(ToolKind::Rectangle, 2.0, &[(10.0, 10.0), (60.0, 60.0)]);
        let right = op(ToolKind::Circle, 2.0, &[(150.0, 50.0), (170.0, 50.0)]);

        let (_, ab) = draw_incrementally(&[left.clone(), right.clone()]);
        let (_, ba) = draw_incrementally(&[right, left]);
        assert_eq!(pixels(&ab), pixels(&ba));
    }

    #[test]
    fn test_clear_race_ghost_removed_by_rejoin() {
        let mut session = session("me");
        let mut pipeline = Pipeline::new(SIZE, 1.0).unwrap();
        let stroke = op(ToolKind::Line, 4.0, &[(10.0, 50.0), (190.0, 50.0)]);

        let d = session.handle_inbound(InboundEvent::Operation(stroke.clone()));
        pipeline.apply(&d, &session);
        let d = session.clear();
        pipeline.apply(&d, &session);
        assert!(pipeline.committed().is_blank());

        // A segment sent before the peer saw the clear.
        let d = session.handle_inbound(InboundEvent::Operation(stroke));
        pipeline.apply(&d, &session);
        assert!(!pipeline.committed().is_blank());

        // Rejoin installs the relay's cleared history.
        session.handle_inbound(InboundEvent::Disconnected);
        let d = session.handle_inbound(InboundEvent::Snapshot {
            operations: Vec::new(),
            tool_state: None,
        });
        pipeline.apply(&d, &session);
        assert!(pipeline.committed().is_blank());
    }

    #[test]
    fn test_preview_lives_on_overlay() {
        let session = session("me");
        let mut pipeline = Pipeline::new(SIZE, 1.0).unwrap();
        let shape = op(ToolKind::Line, 6.0, &[(10.0, 50.0), (190.0, 50.0)]);

        pipeline.apply(&RenderDirective::Preview(Some(Preview::Shape(shape))), &session);
        assert!(pipeline.committed().is_blank());
        assert_eq!(
            pipeline.overlay().pixel_at(Point::new(100.0, 50.0)).unwrap().alpha(),
            255
        );

        pipeline.apply(&RenderDirective::Preview(None), &session);
        assert!(pipeline.overlay().is_blank());
        assert!(pipeline.preview().is_none());
    }

    #[test]
    fn test_presence_markers_drawn_at_percent_position() {
        let mut session = session("me");
        let mut pipeline = Pipeline::new(SIZE, 1.0).unwrap();
        let d = session.handle_inbound(InboundEvent::PointerMove {
            participant_id: "bob".to_string(),
            presence: PresenceUpdate {
                display_name: "Bob".to_string(),
                color: "#ff0000".to_string(),
                position: Point::new(50.0, 50.0),
                is_drawing: true,
            },
        });
        pipeline.apply(&d, &session);

        let swatch = pipeline.overlay().pixel_at(Point::new(100.0, 50.0)).unwrap();
        assert_eq!((swatch.red(), swatch.alpha()), (255, 255));
        // Pulse ring, with a gap between it and the swatch.
        let ring = pipeline.overlay().pixel_at(Point::new(100.0 + PULSE_RADIUS, 50.0));
        assert!(ring.unwrap().alpha() > 0);
        let gap = pipeline.overlay().pixel_at(Point::new(100.0 + 8.0, 50.0));
        assert_eq!(gap.unwrap().alpha(), 0);
        assert!(pipeline.committed().is_blank());

        let d = session.handle_inbound(InboundEvent::Departure {
            participant_id: "bob".to_string(),
        });
        pipeline.apply(&d, &session);
        assert!(pipeline.overlay().is_blank());
    }

    #[test]
    fn test_encode_png() {
        let (_, pipeline) = draw_incrementally(&scene());
        let png = pipeline.encode_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
