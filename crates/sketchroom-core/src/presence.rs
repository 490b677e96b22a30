//! Presence: ephemeral per-participant cursor and display metadata.
//!
//! Presence never enters the operation log. Each client writes only its own
//! entry (by broadcasting pointer moves); everything here is a mirror.

use std::collections::HashMap;

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Derive a stable display color from a participant's name.
///
/// Uses the classic `hash * 31 + c` string hash over UTF-16 code units,
/// mapped onto the hue wheel. The running hash is a double and only the
/// shift wraps to 32 bits, so every client derives the same hue.
pub fn participant_color(name: &str) -> String {
    let hash = name.encode_utf16().fold(0.0f64, |hash, c| {
        let shifted = (hash as i64 as i32).wrapping_shl(5);
        f64::from(c) + (f64::from(shifted) - hash)
    });
    let hue = (hash % 360.0).abs() as u32;
    format!("hsl({hue}, 70%, 60%)")
}

/// Fields carried by a pointer-move broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceUpdate {
    pub display_name: String,
    pub color: String,
    /// Cursor position in percent of the sender's viewport.
    pub position: Point,
    pub is_drawing: bool,
}

impl Default for PresenceUpdate {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            color: String::new(),
            position: Point::ZERO,
            is_drawing: false,
        }
    }
}

/// Mirror of one participant's presence.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub participant_id: String,
    pub display_name: String,
    pub assigned_color: String,
    pub cursor: Point,
    pub is_drawing: bool,
}

/// Everything needed to draw one remote cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorMarker {
    pub participant_id: String,
    pub label: String,
    pub swatch: String,
    /// Horizontal position, percent of viewport width.
    pub left: f64,
    /// Vertical position, percent of viewport height.
    pub top: f64,
    /// Pulse while the participant is drawing.
    pub pulsing: bool,
}

/// Map from participant id to presence entry.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update; the latest call for a participant wins.
    pub fn upsert(&mut self, participant_id: &str, update: PresenceUpdate) {
        let entry = PresenceEntry {
            participant_id: participant_id.to_string(),
            display_name: update.display_name,
            assigned_color: update.color,
            cursor: update.position,
            is_drawing: update.is_drawing,
        };
        if self.entries.insert(participant_id.to_string(), entry).is_none() {
            log::debug!("presence: first sighting of {participant_id}");
        }
    }

    /// Remove a participant after an explicit departure notice.
    pub fn remove(&mut self, participant_id: &str) -> Option<PresenceEntry> {
        self.entries.remove(participant_id)
    }

    /// Drop every mirror (our own connection went away).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, participant_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(participant_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }

    /// Cursor markers for everyone except `exclude` (normally ourselves),
    /// sorted by participant id for stable drawing order.
    pub fn markers(&self, exclude: Option<&str>) -> Vec<CursorMarker> {
        let mut markers: Vec<CursorMarker> = self
            .entries
            .values()
            .filter(|entry| Some(entry.participant_id.as_str()) != exclude)
            .map(|entry| CursorMarker {
                participant_id: entry.participant_id.clone(),
                label: entry.display_name.clone(),
                swatch: entry.assigned_color.clone(),
                left: entry.cursor.x,
                top: entry.cursor.y,
                pulsing: entry.is_drawing,
            })
            .collect();
        markers.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        markers
    }
}
