//! Sketchroom WebSocket Relay
//!
//! A room relay that fans drawing traffic out between participants and keeps
//! an in-memory history per room so late joiners can catch up.
//!
//! ## Protocol
//!
//! JSON text frames tagged by `type` (see `sketchroom_core::protocol`):
//! ```json
//! { "type": "join", "room": "room-id", "display_name": "Ann", "color": "hsl(97, 70%, 60%)" }
//! { "type": "operation", "operation": { "tool": "pen", ... } }
//! { "type": "pointer_move", "position": { "x": 40, "y": 12 }, "is_drawing": true, ... }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use sketchroom_core::{ClientMessage, Operation, ServerMessage, ToolState};
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operations kept per room; the oldest are dropped beyond this.
pub const MAX_ROOM_HISTORY: usize = 50_000;
/// Broadcast messages buffered per room before a slow receiver lags.
pub const CHANNEL_CAPACITY: usize = 256;

/// A broadcast message tagged with its sender's connection id.
pub type Envelope = (String, ServerMessage);

/// Room state
struct Room {
    /// Broadcast channel for this room, tagged with the sender's id
    tx: broadcast::Sender<Envelope>,
    /// Connected participants: id -> display name
    peers: HashMap<String, String>,
    history: VecDeque<Operation>,
    tool_state: Option<ToolState>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashMap::new(),
            history: VecDeque::new(),
            tool_state: None,
        }
    }

    /// Subscribe and copy the catch-up state in one step.
    fn join_state(&self) -> JoinState {
        JoinState {
            rx: self.tx.subscribe(),
            operations: self.history.iter().cloned().collect(),
            tool_state: self.tool_state.clone(),
        }
    }

    fn send(&self, from: &str, msg: ServerMessage) {
        let _ = self.tx.send((from.to_string(), msg));
    }
}

/// What a participant receives on joining.
pub struct JoinState {
    pub rx: broadcast::Receiver<Envelope>,
    pub operations: Vec<Operation>,
    pub tool_state: Option<ToolState>,
}

/// Relay counters served on `/health`.
#[derive(Debug, Serialize)]
pub struct RelayStats {
    pub status: &'static str,
    pub rooms: usize,
    pub participants: usize,
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    history_limit: usize,
    channel_capacity: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_history_limit(MAX_ROOM_HISTORY)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self::with_limits(history_limit, CHANNEL_CAPACITY)
    }

    pub fn with_limits(history_limit: usize, channel_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            history_limit,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Add a participant to a room, creating it if needed.
    pub fn join_room(&self, room_id: &str, peer_id: &str, display_name: &str) -> JoinState {
        let capacity = self.channel_capacity;
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(capacity));
        room.peers.insert(peer_id.to_string(), display_name.to_string());
        room.join_state()
    }

    /// Fresh receiver and snapshot for a participant whose receiver lagged.
    pub fn resync(&self, room_id: &str) -> Option<JoinState> {
        self.rooms.get(room_id).map(|room| room.join_state())
    }

    /// Remove a participant; empty rooms are dropped.
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(peer_id);
            if room.peers.is_empty() {
                drop(room);
                self.rooms.remove_if(room_id, |_, room| room.peers.is_empty());
                debug!("Room {} dropped", room_id);
            }
        }
    }

    /// Append to a room's history, trimming the oldest entries, and fan the
    /// operation out.
    ///
    /// History and channel are updated under the same entry lock, so a
    /// concurrent join sees the operation either in its snapshot or live,
    /// never both.
    pub fn publish_operation(&self, room_id: &str, from: &str, operation: Operation) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.history.push_back(operation.clone());
            while room.history.len() > self.history_limit {
                room.history.pop_front();
            }
            room.send(from, ServerMessage::Operation { operation });
        }
    }

    /// Empty a room's history and tell everyone.
    pub fn publish_clear(&self, room_id: &str, from: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.history.clear();
            let msg = ServerMessage::Clear {
                room: Some(room_id.to_string()),
            };
            room.send(from, msg);
        }
    }

    pub fn publish_tool_state(&self, room_id: &str, from: &str, tool_state: ToolState) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.tool_state = Some(tool_state.clone());
            room.send(from, ServerMessage::ToolState { tool_state });
        }
    }

    /// Broadcast to everyone in the room; the sender filters its own echo.
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            room.send(from, msg);
        }
    }

    pub fn history_len(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.history.len())
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            status: "ok",
            rooms: self.rooms.len(),
            participants: self.rooms.iter().map(|room| room.peers.len()).sum(),
        }
    }
}

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Sketchroom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health(State(state): State<Arc<AppState>>) -> Json<RelayStats> {
    Json(state.stats())
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize and send; `false` once the socket is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match msg.encode() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", msg, e);
            true
        }
    }
}

/// Per-connection room membership.
struct Membership {
    room: String,
    rx: broadcast::Receiver<Envelope>,
}

fn depart(state: &AppState, peer_id: &str, membership: Option<Membership>) {
    if let Some(Membership { room, .. }) = membership {
        state.leave_room(&room, peer_id);
        state.broadcast(
            &room,
            peer_id,
            ServerMessage::Departure {
                participant_id: peer_id.to_string(),
            },
        );
        info!("Peer {} left room {}", peer_id, room);
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    let welcome = ServerMessage::Welcome {
        participant_id: peer_id.clone(),
    };
    if !send_message(&mut sender, &welcome).await {
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };

                let client_msg = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", peer_id, e);
                        let err = ServerMessage::Error { message: format!("Invalid message: {e}") };
                        if !send_message(&mut sender, &err).await {
                            break;
                        }
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Join { room, display_name, color: _ } => {
                        depart(&state, &peer_id, membership.take());

                        let joined = state.join_room(&room, &peer_id, &display_name);
                        membership = Some(Membership { room: room.clone(), rx: joined.rx });
                        info!(
                            "Peer {} ({}) joined room {} with {} operations",
                            peer_id, display_name, room, joined.operations.len()
                        );

                        let snapshot = ServerMessage::Snapshot {
                            operations: joined.operations,
                            tool_state: joined.tool_state,
                        };
                        if !send_message(&mut sender, &snapshot).await {
                            break;
                        }
                    }
                    ClientMessage::Leave => depart(&state, &peer_id, membership.take()),
                    ClientMessage::Operation { operation } => {
                        let Some(Membership { room, .. }) = &membership else { continue };
                        if let Err(e) = operation.validate() {
                            warn!("Rejected operation from {}: {}", peer_id, e);
                            let err = ServerMessage::Error { message: e.to_string() };
                            if !send_message(&mut sender, &err).await {
                                break;
                            }
                            continue;
                        }
                        state.publish_operation(room, &peer_id, operation);
                    }
                    ClientMessage::Clear { .. } => {
                        let Some(Membership { room, .. }) = &membership else { continue };
                        state.publish_clear(room, &peer_id);
                        info!("Peer {} cleared room {}", peer_id, room);
                    }
                    ClientMessage::ToolState { tool_state } => {
                        let Some(Membership { room, .. }) = &membership else { continue };
                        state.publish_tool_state(room, &peer_id, tool_state);
                    }
                    ClientMessage::PointerMove { presence } => {
                        let Some(Membership { room, .. }) = &membership else { continue };
                        state.broadcast(room, &peer_id, ServerMessage::PointerMove {
                            participant_id: peer_id.clone(),
                            presence,
                        });
                    }
                }
            }

            msg = async {
                match &mut membership {
                    Some(Membership { rx, .. }) => Some(rx.recv().await),
                    // No room joined, just wait forever
                    None => std::future::pending::<Option<Result<Envelope, RecvError>>>().await,
                }
            } => {
                match msg {
                    Some(Ok((from, server_msg))) => {
                        // Don't echo back to sender
                        if from != peer_id && !send_message(&mut sender, &server_msg).await {
                            break;
                        }
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        // Skipped operations are gone from the channel; resend the room.
                        warn!("Peer {} lagged, skipped {} messages; resyncing", peer_id, skipped);
                        let Some(m) = membership.as_mut() else { continue };
                        let Some(joined) = state.resync(&m.room) else { continue };
                        m.rx = joined.rx;
                        let snapshot = ServerMessage::Snapshot {
                            operations: joined.operations,
                            tool_state: joined.tool_state,
                        };
                        if !send_message(&mut sender, &snapshot).await {
                            break;
                        }
                    }
                    Some(Err(RecvError::Closed)) | None => {
                        membership = None;
                    }
                }
            }
        }
    }

    depart(&state, &peer_id, membership.take());
    info!("Connection closed: {}", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchroom_core::ToolKind;

    fn line(x: f64) -> Operation {
        serde_json::from_value(serde_json::json!({
            "tool": "line",
            "color": "#fff",
            "width": 2.0,
            "points": [{ "x": x, "y": 0.0 }, { "x": x, "y": 10.0 }],
        }))
        .unwrap()
    }

    #[test]
    fn test_join_returns_history_and_tool_state() {
        let state = AppState::new();
        state.join_room("r1", "a", "Ann");
        state.publish_operation("r1", "a", line(1.0));
        state.publish_tool_state(
            "r1",
            "a",
            ToolState {
                active_tool: ToolKind::Circle,
                color: "#000".to_string(),
                width: 4.0,
            },
        );

        let joined = state.join_room("r1", "b", "Bob");
        assert_eq!(joined.operations, vec![line(1.0)]);
        assert_eq!(joined.tool_state.unwrap().active_tool, ToolKind::Circle);
        assert_eq!(state.stats().participants, 2);
    }

    #[test]
    fn test_history_is_capped() {
        let state = AppState::with_history_limit(3);
        state.join_room("r1", "a", "Ann");
        for i in 0..5 {
            state.publish_operation("r1", "a", line(i as f64));
        }
        let joined = state.join_room("r1", "b", "Bob");
        assert_eq!(joined.operations.len(), 3);
        assert_eq!(joined.operations[0], line(2.0));
    }

    #[test]
    fn test_clear_history() {
        let state = AppState::new();
        state.join_room("r1", "a", "Ann");
        state.publish_operation("r1", "a", line(1.0));
        state.publish_clear("r1", "a");
        assert_eq!(state.history_len("r1"), 0);
    }

    #[test]
    fn test_operation_seen_once_by_joiner() {
        let state = AppState::new();
        state.join_room("r1", "a", "Ann");
        state.publish_operation("r1", "a", line(1.0));

        let mut joined = state.join_room("r1", "b", "Bob");
        assert_eq!(joined.operations, vec![line(1.0)]);
        assert!(joined.rx.try_recv().is_err());

        state.publish_operation("r1", "a", line(2.0));
        let (from, msg) = joined.rx.try_recv().unwrap();
        assert_eq!(from, "a");
        assert_eq!(msg, ServerMessage::Operation { operation: line(2.0) });
    }

    #[test]
    fn test_resync_after_lag() {
        let state = AppState::with_limits(MAX_ROOM_HISTORY, 2);
        let mut joined = state.join_room("r1", "b", "Bob");
        for i in 0..5 {
            state.publish_operation("r1", "a", line(i as f64));
        }
        assert!(matches!(joined.rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(_))));

        let mut resynced = state.resync("r1").unwrap();
        assert_eq!(resynced.operations.len(), 5);
        assert!(resynced.rx.try_recv().is_err());
        assert!(state.resync("missing").is_none());
    }

    #[test]
    fn test_empty_room_dropped() {
        let state = AppState::new();
        state.join_room("r1", "a", "Ann");
        state.join_room("r1", "b", "Bob");
        state.leave_room("r1", "a");
        assert_eq!(state.stats().rooms, 1);
        state.leave_room("r1", "b");
        assert_eq!(state.stats().rooms, 0);
        // Writes to a dropped room are ignored.
        state.publish_operation("r1", "a", line(1.0));
        assert_eq!(state.history_len("r1"), 0);
    }
}
