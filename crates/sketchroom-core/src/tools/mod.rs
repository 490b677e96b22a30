//! Tool system: the active tool, color and width, and gesture recording.

mod gesture;

pub use gesture::{DEFAULT_SAMPLE_INTERVAL, GestureOutput, GestureRecorder, Preview, PreviewUpdate};

pub use crate::operation::ToolKind;
use crate::operation::MAX_WIDTH;
use serde::{Deserialize, Serialize};

/// Default stroke width for new sessions.
pub const DEFAULT_WIDTH: f64 = 2.0;
/// Smallest width a tool may be set to.
pub const MIN_WIDTH: f64 = 0.5;
/// Default stroke color before a participant color is assigned.
pub const DEFAULT_COLOR: &str = "#FFFFFF";

/// The active tool, color and width.
///
/// Broadcast on every change and included in catch-up snapshots. Purely
/// cosmetic for peers: a received operation always carries its own style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolState {
    pub active_tool: ToolKind,
    pub color: String,
    pub width: f64,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            active_tool: ToolKind::default(),
            color: DEFAULT_COLOR.to_string(),
            width: DEFAULT_WIDTH,
        }
    }
}

/// Holds the local tool state. Mutations apply immediately so the next
/// gesture uses them; callers broadcast the returned state.
#[derive(Debug, Clone, Default)]
pub struct ToolStateMachine {
    state: ToolState,
}

impl ToolStateMachine {
    /// Create a tool state machine drawing in `color`.
    pub fn new(color: impl Into<String>) -> Self {
        Self {
            state: ToolState {
                color: color.into(),
                ..ToolState::default()
            },
        }
    }

    /// Current tool state.
    pub fn state(&self) -> &ToolState {
        &self.state
    }

    /// Currently selected tool.
    pub fn active_tool(&self) -> ToolKind {
        self.state.active_tool
    }

    /// Select a tool.
    pub fn select_tool(&mut self, tool: ToolKind) -> ToolState {
        self.state.active_tool = tool;
        self.state.clone()
    }

    /// Set the stroke color.
    pub fn set_color(&mut self, color: impl Into<String>) -> ToolState {
        self.state.color = color.into();
        self.state.clone()
    }

    /// Set the stroke width, clamped to [`MIN_WIDTH`, `MAX_WIDTH`].
    pub fn set_width(&mut self, width: f64) -> ToolState {
        self.state.width = if width.is_finite() {
            width.clamp(MIN_WIDTH, MAX_WIDTH)
        } else {
            DEFAULT_WIDTH
        };
        self.state.clone()
    }

    /// Adopt a tool state broadcast by a peer (or carried by a snapshot).
    ///
    /// Last write wins for tool and width; the local color is kept.
    /// Returns `true` if anything changed.
    pub fn apply_remote(&mut self, remote: &ToolState) -> bool {
        let width = if remote.width.is_finite() && remote.width > 0.0 {
            remote.width
        } else {
            self.state.width
        };
        let changed = self.state.active_tool != remote.active_tool || self.state.width != width;
        self.state.active_tool = remote.active_tool;
        self.state.width = width;
        changed
    }
}
