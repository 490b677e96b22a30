//! Room session: the per-room state machine tying input, the operation log,
//! tool state and presence together.
//!
//! A [`RoomSession`] is an explicit value, owned by the replication channel
//! and lent to renderers. Local input is applied optimistically and queued
//! for broadcast; inbound traffic arrives as [`InboundEvent`]s handled by a
//! single exhaustive match.

use std::time::Duration;

use kurbo::Size;

use crate::config::SessionConfig;
use crate::input::{Instant, PointerEvent, viewport_percent};
use crate::log::{ArrivalOrder, OperationLog, OrderingPolicy, RenderDirective};
use crate::operation::{Author, Operation, ToolKind};
use crate::presence::{CursorMarker, PresenceTracker, PresenceUpdate, participant_color};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::tools::{GestureRecorder, PreviewUpdate, ToolState, ToolStateMachine};

/// Everything that can happen to a session from the outside.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The relay assigned our connection id.
    Welcome { participant_id: String },
    /// Catch-up state after (re)joining.
    Snapshot {
        operations: Vec<Operation>,
        tool_state: Option<ToolState>,
    },
    /// A peer's operation.
    Operation(Operation),
    /// A peer cleared the room.
    Clear,
    /// A peer changed tools.
    ToolState(ToolState),
    /// A peer's cursor moved.
    PointerMove {
        participant_id: String,
        presence: PresenceUpdate,
    },
    /// A peer left.
    Departure { participant_id: String },
    /// Our transport dropped.
    Disconnected,
    /// The relay reported an error.
    Error { message: String },
}

impl From<ServerMessage> for InboundEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Welcome { participant_id } => InboundEvent::Welcome { participant_id },
            ServerMessage::Snapshot { operations, tool_state } => {
                InboundEvent::Snapshot { operations, tool_state }
            }
            ServerMessage::Operation { operation } => InboundEvent::Operation(operation),
            ServerMessage::Clear { .. } => InboundEvent::Clear,
            ServerMessage::ToolState { tool_state } => InboundEvent::ToolState(tool_state),
            ServerMessage::PointerMove { participant_id, presence } => {
                InboundEvent::PointerMove { participant_id, presence }
            }
            ServerMessage::Departure { participant_id } => {
                InboundEvent::Departure { participant_id }
            }
            ServerMessage::Error { message } => InboundEvent::Error { message },
        }
    }
}

/// State of one participant's view of one room.
pub struct RoomSession<P = ArrivalOrder> {
    room_id: String,
    author: Author,
    assigned_color: String,
    log: OperationLog<P>,
    tools: ToolStateMachine,
    presence: PresenceTracker,
    gesture: GestureRecorder,
    /// Surface size in logical pixels, for percent cursor positions.
    viewport: Size,
    /// Whether a snapshot has been installed since the last (re)join.
    joined: bool,
    /// Minimum spacing between presence updates for plain moves.
    presence_interval: Duration,
    last_presence: Option<Instant>,
    /// Pending outgoing messages.
    outgoing: Vec<ClientMessage>,
}

impl RoomSession<ArrivalOrder> {
    /// Create a session with arrival ordering.
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_policy(config, ArrivalOrder)
    }
}

impl<P: OrderingPolicy> RoomSession<P> {
    /// Create a session with a custom operation ordering policy.
    pub fn with_policy(config: &SessionConfig, policy: P) -> Self {
        let assigned_color = participant_color(&config.display_name);
        Self {
            room_id: config.room_id.clone(),
            author: Author {
                id: String::new(),
                name: config.display_name.clone(),
            },
            tools: ToolStateMachine::new(assigned_color.clone()),
            assigned_color,
            log: OperationLog::with_policy(policy),
            presence: PresenceTracker::new(),
            gesture: GestureRecorder::new(config.sample_interval()),
            viewport: Size::ZERO,
            joined: false,
            presence_interval: config.sample_interval(),
            last_presence: None,
            outgoing: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Our relay-assigned connection id, once welcomed.
    pub fn participant_id(&self) -> Option<&str> {
        (!self.author.id.is_empty()).then_some(self.author.id.as_str())
    }

    pub fn display_name(&self) -> &str {
        &self.author.name
    }

    pub fn assigned_color(&self) -> &str {
        &self.assigned_color
    }

    pub fn log(&self) -> &OperationLog<P> {
        &self.log
    }

    pub fn tool_state(&self) -> &ToolState {
        self.tools.state()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Remote cursors to draw (excludes ourselves).
    pub fn cursor_markers(&self) -> Vec<CursorMarker> {
        self.presence.markers(self.participant_id())
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_drawing(&self) -> bool {
        self.gesture.is_drawing()
    }

    /// Record the surface size used for percent cursor positions.
    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    // --- Room membership ---

    /// Queue a join for this room. Sent on every (re)connect.
    pub fn announce(&mut self) {
        self.joined = false;
        self.outgoing.push(ClientMessage::Join {
            room: self.room_id.clone(),
            display_name: self.author.name.clone(),
            color: self.assigned_color.clone(),
        });
    }

    /// Queue a clean departure.
    pub fn leave(&mut self) {
        self.joined = false;
        self.outgoing.push(ClientMessage::Leave);
    }

    // --- Local mutations ---

    /// Feed a local pointer event. Committed operations are appended to the
    /// log and queued for broadcast.
    ///
    /// Presence updates for moves are throttled to the sample interval;
    /// press, release and leave always send one.
    pub fn handle_pointer(&mut self, event: PointerEvent, now: Instant) -> Vec<RenderDirective> {
        let output = self
            .gesture
            .handle(event, now, self.tools.state(), &self.author);

        let mut directives = Vec::with_capacity(output.operations.len() + 1);
        for operation in output.operations {
            directives.push(self.log.append(operation.clone()));
            self.outgoing.push(ClientMessage::Operation { operation });
        }
        match output.preview {
            PreviewUpdate::Keep => {}
            PreviewUpdate::Show(preview) => {
                directives.push(RenderDirective::Preview(Some(preview)))
            }
            PreviewUpdate::Hide => directives.push(RenderDirective::Preview(None)),
        }

        let due = self
            .last_presence
            .is_none_or(|last| now.saturating_duration_since(last) >= self.presence_interval);
        if matches!(event, PointerEvent::Move { .. }) && !due {
            return directives;
        }
        self.last_presence = Some(now);
        self.outgoing.push(ClientMessage::PointerMove {
            presence: PresenceUpdate {
                display_name: self.author.name.clone(),
                color: self.assigned_color.clone(),
                position: viewport_percent(event.position(), self.viewport),
                is_drawing: self.gesture.is_drawing(),
            },
        });
        directives
    }

    /// Select a tool and broadcast the new tool state.
    pub fn select_tool(&mut self, tool: ToolKind) {
        let tool_state = self.tools.select_tool(tool);
        self.outgoing.push(ClientMessage::ToolState { tool_state });
    }

    /// Set the stroke color and broadcast the new tool state.
    pub fn set_color(&mut self, color: impl Into<String>) {
        let tool_state = self.tools.set_color(color);
        self.outgoing.push(ClientMessage::ToolState { tool_state });
    }

    /// Set the stroke width and broadcast the new tool state.
    pub fn set_width(&mut self, width: f64) {
        let tool_state = self.tools.set_width(width);
        self.outgoing.push(ClientMessage::ToolState { tool_state });
    }

    /// Clear the drawing locally and for the whole room.
    pub fn clear(&mut self) -> RenderDirective {
        self.outgoing.push(ClientMessage::Clear {
            room: self.room_id.clone(),
        });
        self.log.clear()
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Inbound ---

    /// Apply one inbound event.
    pub fn handle_inbound(&mut self, event: InboundEvent) -> RenderDirective {
        match event {
            InboundEvent::Welcome { participant_id } => {
                log::info!("welcomed as {participant_id}");
                self.author.id = participant_id;
                RenderDirective::None
            }
            InboundEvent::Snapshot { operations, tool_state } => {
                if let Some(tool_state) = tool_state {
                    self.tools.apply_remote(&tool_state);
                }
                let total = operations.len();
                let operations: Vec<Operation> = operations
                    .into_iter()
                    .filter(|op| match op.validate() {
                        Ok(()) => true,
                        Err(e) => {
                            log::warn!("dropping invalid snapshot operation: {e}");
                            false
                        }
                    })
                    .collect();
                log::info!(
                    "joined room {} with {} of {} operations",
                    self.room_id,
                    operations.len(),
                    total
                );
                self.joined = true;
                self.log.replace_all(operations)
            }
            InboundEvent::Operation(operation) => match operation.validate() {
                Ok(()) => self.log.append(operation),
                Err(e) => {
                    log::warn!("dropping invalid operation from {}: {e}", operation.author_id);
                    RenderDirective::None
                }
            },
            InboundEvent::Clear => self.log.clear(),
            InboundEvent::ToolState(tool_state) => {
                self.tools.apply_remote(&tool_state);
                RenderDirective::None
            }
            InboundEvent::PointerMove { participant_id, presence } => {
                if self.participant_id() == Some(participant_id.as_str()) {
                    return RenderDirective::None;
                }
                self.presence.upsert(&participant_id, presence);
                RenderDirective::Presence
            }
            InboundEvent::Departure { participant_id } => {
                match self.presence.remove(&participant_id) {
                    Some(_) => RenderDirective::Presence,
                    None => RenderDirective::None,
                }
            }
            InboundEvent::Disconnected => {
                self.joined = false;
                self.presence.clear();
                RenderDirective::Presence
            }
            InboundEvent::Error { message } => {
                log::warn!("relay error: {message}");
                RenderDirective::None
            }
        }
    }
}
