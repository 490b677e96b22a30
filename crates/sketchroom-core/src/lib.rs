//! Sketchroom Core Library
//!
//! Platform-agnostic state for the Sketchroom shared drawing surface: the
//! operation log, tool state, presence, wire protocol and the replication
//! channel that keeps participants in a room converged.

pub mod channel;
pub mod config;
pub mod geometry;
pub mod input;
pub mod log;
pub mod operation;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod tools;

pub use channel::ReplicationChannel;
pub use config::{ConfigError, ReconnectPolicy, SessionConfig};
pub use input::{Instant, PointerEvent};
pub use log::{ArrivalOrder, OperationLog, OrderingPolicy, RenderDirective};
pub use operation::{Author, Operation, OperationError, ToolKind};
pub use presence::{CursorMarker, PresenceTracker, PresenceUpdate, participant_color};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use session::{InboundEvent, RoomSession};
pub use sync::{ConnectionState, PlatformWebSocket, Transport, TransportError, TransportEvent};
pub use tools::{GestureRecorder, Preview, ToolState, ToolStateMachine};
