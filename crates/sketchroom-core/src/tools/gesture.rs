//! Turns pointer gestures into drawing operations.

use std::time::Duration;

use kurbo::Point;

use super::ToolState;
use crate::input::{Instant, PointerEvent};
use crate::operation::{Author, Operation, ToolKind};

/// Minimum spacing between retained pen samples (~60 Hz).
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(16);

/// Provisional drawing shown only to the local participant.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    /// Live pen stroke, rendered smoothed through all retained samples.
    Stroke {
        points: Vec<Point>,
        color: String,
        width: f64,
    },
    /// Shape being dragged; never logged or transmitted.
    Shape(Operation),
}

/// What to do with the provisional preview after an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PreviewUpdate {
    #[default]
    Keep,
    Show(Preview),
    Hide,
}

/// Result of feeding one pointer event to the recorder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureOutput {
    /// Operations committed by this event, in order.
    pub operations: Vec<Operation>,
    pub preview: PreviewUpdate,
}

/// A gesture in progress. Tool and style are latched at pointer-down.
#[derive(Debug, Clone)]
struct ActiveGesture {
    tool: ToolKind,
    color: String,
    width: f64,
    anchor: Point,
    /// Retained pen samples (pen only).
    samples: Vec<Point>,
    last_sample: Instant,
    /// Latest drag position (shapes only).
    current: Option<Point>,
}

/// Records one pointer gesture at a time.
#[derive(Debug, Clone)]
pub struct GestureRecorder {
    sample_interval: Duration,
    active: Option<ActiveGesture>,
}

impl Default for GestureRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

impl GestureRecorder {
    /// Create a recorder that retains at most one pen sample per `sample_interval`.
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sample_interval,
            active: None,
        }
    }

    /// Whether a gesture is in progress.
    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// Feed a pointer event.
    pub fn handle(
        &mut self,
        event: PointerEvent,
        now: Instant,
        tools: &ToolState,
        author: &Author,
    ) -> GestureOutput {
        match event {
            PointerEvent::Down { position } => {
                self.begin(position, now, tools);
                GestureOutput::default()
            }
            PointerEvent::Move { position } => self.update(position, now, author),
            PointerEvent::Up { position } | PointerEvent::Leave { position } => {
                self.end(position, author)
            }
        }
    }

    fn begin(&mut self, position: Point, now: Instant, tools: &ToolState) {
        if self.active.is_some() {
            log::debug!("pointer-down during an active gesture; restarting");
        }
        self.active = Some(ActiveGesture {
            tool: tools.active_tool,
            color: tools.color.clone(),
            width: tools.width,
            anchor: position,
            samples: vec![position],
            last_sample: now,
            current: None,
        });
    }

    fn update(&mut self, position: Point, now: Instant, author: &Author) -> GestureOutput {
        let Some(gesture) = self.active.as_mut() else {
            return GestureOutput::default();
        };

        match gesture.tool {
            ToolKind::Pen => {
                if now.saturating_duration_since(gesture.last_sample) < self.sample_interval {
                    return GestureOutput::default();
                }
                gesture.samples.push(position);
                gesture.last_sample = now;

                GestureOutput {
                    operations: latest_segment(gesture, author).into_iter().collect(),
                    preview: PreviewUpdate::Show(Preview::Stroke {
                        points: gesture.samples.clone(),
                        color: gesture.color.clone(),
                        width: gesture.width,
                    }),
                }
            }
            ToolKind::Eraser => GestureOutput {
                operations: vec![Operation::new(
                    ToolKind::Eraser,
                    gesture.color.clone(),
                    gesture.width,
                    vec![position],
                    author,
                )],
                preview: PreviewUpdate::Keep,
            },
            tool => {
                gesture.current = Some(position);
                GestureOutput {
                    operations: Vec::new(),
                    preview: PreviewUpdate::Show(Preview::Shape(Operation::new(
                        tool,
                        gesture.color.clone(),
                        gesture.width,
                        vec![gesture.anchor, position],
                        author,
                    ))),
                }
            }
        }
    }

    fn end(&mut self, position: Point, author: &Author) -> GestureOutput {
        let Some(mut gesture) = self.active.take() else {
            return GestureOutput::default();
        };

        let operations = match gesture.tool {
            ToolKind::Pen => {
                // Finish the stroke under the pointer if the last move was throttled away.
                let needs_tail = gesture.samples.len() >= 2
                    && gesture.samples.last().is_some_and(|last| *last != position);
                if needs_tail {
                    gesture.samples.push(position);
                    latest_segment(&gesture, author).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            ToolKind::Eraser => Vec::new(),
            tool => gesture
                .current
                .map(|current| {
                    Operation::new(
                        tool,
                        gesture.color.clone(),
                        gesture.width,
                        vec![gesture.anchor, current],
                        author,
                    )
                })
                .into_iter()
                .collect(),
        };

        GestureOutput {
            operations,
            preview: PreviewUpdate::Hide,
        }
    }
}

/// Two-point pen operation from the most recent pair of samples.
fn latest_segment(gesture: &ActiveGesture, author: &Author) -> Option<Operation> {
    match gesture.samples.as_slice() {
        [.., prev, last] => Some(Operation::new(
            ToolKind::Pen,
            gesture.color.clone(),
            gesture.width,
            vec![*prev, *last],
            author,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            id: "conn-1".to_string(),
            name: "Ann".to_string(),
        }
    }

    fn tools(tool: ToolKind) -> ToolState {
        ToolState {
            active_tool: tool,
            color: "#ff0000".to_string(),
            width: 3.0,
        }
    }

    fn at(ms: u64, start: Instant) -> Instant {
        start + Duration::from_millis(ms)
    }

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Down { position: Point::new(x, y) }
    }

    fn moved(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Move { position: Point::new(x, y) }
    }

    fn up(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Up { position: Point::new(x, y) }
    }

    fn leave(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Leave { position: Point::new(x, y) }
    }

    #[test]
    fn test_single_point_gesture_emits_nothing() {
        for tool in ToolKind::ALL {
            let mut rec = GestureRecorder::default();
            let t0 = Instant::now();
            let state = tools(tool);
            let p = Point::new(5.0, 5.0);
            let down = rec.handle(PointerEvent::Down { position: p }, t0, &state, &author());
            let up = rec.handle(PointerEvent::Up { position: p }, at(50, t0), &state, &author());
            assert!(down.operations.is_empty(), "{tool:?}");
            assert!(up.operations.is_empty(), "{tool:?}");
            assert!(!rec.is_drawing());
        }
    }

    #[test]
    fn test_pen_emits_segment_per_retained_sample() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let state = tools(ToolKind::Pen);
        let a = author();

        rec.handle(down(0.0, 0.0), t0, &state, &a);
        assert!(rec.is_drawing());

        // Too soon after pointer-down: throttled.
        let out = rec.handle(moved(1.0, 1.0), at(5, t0), &state, &a);
        assert!(out.operations.is_empty());
        assert_eq!(out.preview, PreviewUpdate::Keep);

        let out = rec.handle(moved(10.0, 0.0), at(20, t0), &state, &a);
        assert_eq!(out.operations.len(), 1);
        let seg = &out.operations[0];
        assert_eq!(seg.tool, ToolKind::Pen);
        assert_eq!(seg.points, vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]);
        assert_eq!(seg.color, "#ff0000");
        assert_eq!(seg.author_id, "conn-1");
        assert!(matches!(
            out.preview,
            PreviewUpdate::Show(Preview::Stroke { ref points, .. }) if points.len() == 2
        ));

        let out = rec.handle(moved(20.0, 5.0), at(40, t0), &state, &a);
        assert_eq!(out.operations[0].points, vec![Point::new(10.0, 0.0), Point::new(20.0, 5.0)]);
    }

    #[test]
    fn test_pen_release_adds_tail_segment() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let state = tools(ToolKind::Pen);
        let a = author();

        rec.handle(down(0.0, 0.0), t0, &state, &a);
        rec.handle(moved(10.0, 0.0), at(20, t0), &state, &a);
        // Throttled move, then release somewhere else.
        rec.handle(moved(12.0, 0.0), at(25, t0), &state, &a);
        let out = rec.handle(up(15.0, 0.0), at(30, t0), &state, &a);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].points, vec![Point::new(10.0, 0.0), Point::new(15.0, 0.0)]);
        assert_eq!(out.preview, PreviewUpdate::Hide);
    }

    #[test]
    fn test_pen_release_at_last_sample_emits_nothing_extra() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let state = tools(ToolKind::Pen);
        let a = author();

        rec.handle(down(0.0, 0.0), t0, &state, &a);
        rec.handle(moved(10.0, 0.0), at(20, t0), &state, &a);
        let out = rec.handle(up(10.0, 0.0), at(30, t0), &state, &a);
        assert!(out.operations.is_empty());
    }

    #[test]
    fn test_eraser_emits_dab_per_move() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let state = tools(ToolKind::Eraser);
        let a = author();

        rec.handle(down(0.0, 0.0), t0, &state, &a);
        let out = rec.handle(moved(4.0, 4.0), at(1, t0), &state, &a);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].tool, ToolKind::Eraser);
        assert_eq!(out.operations[0].points, vec![Point::new(4.0, 4.0)]);
        // Nominal width travels on the wire; the radius factor is a render concern.
        assert_eq!(out.operations[0].width, 3.0);

        let out = rec.handle(moved(5.0, 4.0), at(2, t0), &state, &a);
        assert_eq!(out.operations.len(), 1);
    }

    #[test]
    fn test_shape_previews_then_commits_once() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let state = tools(ToolKind::Rectangle);
        let a = author();

        rec.handle(down(10.0, 10.0), t0, &state, &a);
        let out = rec.handle(moved(0.0, 0.0), at(1, t0), &state, &a);
        assert!(out.operations.is_empty());
        match out.preview {
            PreviewUpdate::Show(Preview::Shape(op)) => {
                assert_eq!(op.points, vec![Point::new(10.0, 10.0), Point::new(0.0, 0.0)]);
            }
            other => panic!("expected shape preview, got {other:?}"),
        }
        rec.handle(moved(30.0, 40.0), at(2, t0), &state, &a);

        let out = rec.handle(leave(99.0, 99.0), at(3, t0), &state, &a);
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].tool, ToolKind::Rectangle);
        assert_eq!(out.operations[0].points, vec![Point::new(10.0, 10.0), Point::new(30.0, 40.0)]);
        assert_eq!(out.preview, PreviewUpdate::Hide);
    }

    #[test]
    fn test_style_latched_at_pointer_down() {
        let mut rec = GestureRecorder::default();
        let t0 = Instant::now();
        let a = author();

        rec.handle(down(0.0, 0.0), t0, &tools(ToolKind::Line), &a);
        let switched = tools(ToolKind::Eraser);
        rec.handle(moved(5.0, 5.0), at(1, t0), &switched, &a);
        let out = rec.handle(up(5.0, 5.0), at(2, t0), &switched, &a);
        assert_eq!(out.operations[0].tool, ToolKind::Line);
    }

    #[test]
    fn test_move_without_gesture_is_ignored() {
        let mut rec = GestureRecorder::default();
        let out = rec.handle(
            moved(1.0, 1.0),
            Instant::now(),
            &tools(ToolKind::Pen),
            &author(),
        );
        assert_eq!(out, GestureOutput::default());
    }
}
