//! Wire protocol spoken with the room relay.
//!
//! Messages are JSON text frames tagged by `type`:
//! ```json
//! { "type": "join", "room": "r1", "display_name": "Ann", "color": "hsl(97, 70%, 60%)" }
//! { "type": "operation", "operation": { "tool": "pen", "color": "#fff", "width": 2, "points": [...] } }
//! { "type": "pointer_move", "participant_id": "...", "display_name": "Ann", "position": { "x": 40, "y": 12 }, "is_drawing": true, "color": "..." }
//! ```
//! Optional fields default when missing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::Operation;
use crate::presence::PresenceUpdate;
use crate::tools::ToolState;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register in a room; the relay answers with a snapshot.
    Join {
        room: String,
        display_name: String,
        color: String,
    },
    /// Clean departure.
    Leave,
    /// One committed operation.
    Operation { operation: Operation },
    /// Empty the room's drawing.
    Clear { room: String },
    /// Tool selection changed (cosmetic).
    ToolState { tool_state: ToolState },
    /// Local cursor moved.
    PointerMove {
        #[serde(flatten)]
        presence: PresenceUpdate,
    },
}

impl ClientMessage {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted; carries the relay-assigned connection id.
    Welcome { participant_id: String },
    /// Catch-up state for a (re)joining participant.
    Snapshot {
        #[serde(default)]
        operations: Vec<Operation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_state: Option<ToolState>,
    },
    /// Operation authored by a peer.
    Operation { operation: Operation },
    /// A peer cleared the room.
    Clear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    /// A peer changed tools.
    ToolState { tool_state: ToolState },
    /// A peer's cursor moved.
    PointerMove {
        participant_id: String,
        #[serde(flatten)]
        presence: PresenceUpdate,
    },
    /// A peer left the room.
    Departure { participant_id: String },
    /// Relay-side error report.
    Error { message: String },
}

impl ServerMessage {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
