//! WebSocket transport to the room relay.
//!
//! Provides a platform-agnostic, poll-based client. Transports move raw text
//! frames only; decoding happens in the replication channel.

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection failed: {0}")]
    Connect(String),
}

/// Raw events surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket closed (either side).
    Closed,
    /// The socket failed; a `Closed` may or may not follow.
    Error(String),
}

/// Lifecycle of the replication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to retry; `attempt` is 1-based.
    Reconnecting { attempt: u32 },
    /// Gave up after exhausting the retry budget.
    Failed,
}

/// A bidirectional text-frame transport.
///
/// Implementations must never block: `connect` starts the handshake and
/// reports completion through [`TransportEvent::Opened`].
pub trait Transport {
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn send(&self, text: &str) -> Result<(), TransportError>;
    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

// ============================================================================
// WASM WebSocket Client
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_client {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

    /// WebSocket client for WASM.
    ///
    /// Browser callbacks push into a shared queue drained by `poll_events()`.
    pub struct WasmWebSocket {
        ws: Option<WebSocket>,
        events: Rc<RefCell<Vec<TransportEvent>>>,
        // Keep closures alive for as long as the socket is.
        _on_open: Option<Closure<dyn Fn()>>,
        _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
        _on_close: Option<Closure<dyn Fn(CloseEvent)>>,
        _on_error: Option<Closure<dyn Fn(ErrorEvent)>>,
    }

    impl WasmWebSocket {
        pub fn new() -> Self {
            Self {
                ws: None,
                events: Rc::new(RefCell::new(Vec::new())),
                _on_open: None,
                _on_message: None,
                _on_close: None,
                _on_error: None,
            }
        }
    }

    impl Transport for WasmWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.ws.is_some() {
                return Err(TransportError::AlreadyConnected);
            }

            let ws = WebSocket::new(url).map_err(|e| TransportError::Connect(format!("{e:?}")))?;
            ws.set_binary_type(web_sys::BinaryType::Arraybuffer);

            let events_open = self.events.clone();
            let on_open = Closure::wrap(Box::new(move || {
                events_open.borrow_mut().push(TransportEvent::Opened);
            }) as Box<dyn Fn()>);
            ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            let events_msg = self.events.clone();
            let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
                if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                    events_msg
                        .borrow_mut()
                        .push(TransportEvent::Message(txt.into()));
                }
            }) as Box<dyn Fn(MessageEvent)>);
            ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let events_close = self.events.clone();
            let on_close = Closure::wrap(Box::new(move |_e: CloseEvent| {
                events_close.borrow_mut().push(TransportEvent::Closed);
            }) as Box<dyn Fn(CloseEvent)>);
            ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

            let events_err = self.events.clone();
            let on_error = Closure::wrap(Box::new(move |_e: ErrorEvent| {
                events_err
                    .borrow_mut()
                    .push(TransportEvent::Error("WebSocket error".to_string()));
            }) as Box<dyn Fn(ErrorEvent)>);
            ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            self.ws = Some(ws);
            self._on_open = Some(on_open);
            self._on_message = Some(on_message);
            self._on_close = Some(on_close);
            self._on_error = Some(on_error);

            Ok(())
        }

        fn disconnect(&mut self) {
            if let Some(ws) = self.ws.take() {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onclose(None);
                ws.set_onerror(None);
                let _ = ws.close();
            }
            self._on_open = None;
            self._on_message = None;
            self._on_close = None;
            self._on_error = None;
        }

        fn send(&self, text: &str) -> Result<(), TransportError> {
            match self.ws {
                Some(ref ws) => ws
                    .send_with_str(text)
                    .map_err(|e| TransportError::Send(format!("{e:?}"))),
                None => Err(TransportError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let events = std::mem::take(&mut *self.events.borrow_mut());
            // A closed browser socket cannot be reopened; release it so the
            // next `connect` starts fresh.
            if events.iter().any(|e| matches!(e, TransportEvent::Closed)) {
                self.disconnect();
            }
            events
        }
    }

    impl Default for WasmWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_client::WasmWebSocket;

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        fn release(&mut self) {
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
    }

    /// Longest prefix of `text` within `max` bytes that ends on a char boundary.
    fn truncate_utf8(text: &str, max: usize) -> &str {
        if text.len() <= max {
            return text;
        }
        let end = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= max)
            .last()
            .unwrap_or(0);
        &text[..end]
    }

    fn run_socket(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("relay socket: connecting to {url}");

        let (mut socket, response) = match connect(&url) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("relay connection failed: {e}");
                let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                let _ = event_tx.send(TransportEvent::Closed);
                return;
            }
        };
        log::info!("relay socket connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Opened);

        // Short read timeout so outgoing commands are not starved.
        match socket.get_mut() {
            tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }
            #[allow(unreachable_patterns)]
            _ => log::debug!("non-plain stream; relying on default timeouts"),
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(text)) => {
                    log::trace!("relay send: {}", truncate_utf8(&text, 100));
                    if let Err(e) = socket.send(Message::Text(text)) {
                        log::error!("relay send error: {e}");
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Message(text.to_string()));
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("relay sent close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("relay read error: {e}");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        log::info!("relay socket thread exiting");
        let _ = event_tx.send(TransportEvent::Closed);
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::AlreadyConnected);
            }

            let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme {}",
                    parsed.scheme()
                )));
            }

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<TransportEvent>();
            let url = url.to_string();
            let handle = thread::spawn(move || run_socket(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.release();
        }

        fn send(&self, text: &str) -> Result<(), TransportError> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(text.to_string()))
                    .map_err(|e| TransportError::Send(e.to_string())),
                None => Err(TransportError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let mut events = Vec::new();
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    events.push(event);
                }
            }
            // The worker thread is gone after `Closed`; allow reconnecting.
            if events.iter().any(|e| matches!(e, TransportEvent::Closed)) {
                self.release();
            }
            events
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_rejects_bad_url() {
            let mut ws = NativeWebSocket::new();
            assert!(matches!(
                ws.connect("http://localhost:3030/ws"),
                Err(TransportError::InvalidUrl(_))
            ));
            assert!(matches!(ws.connect("not a url"), Err(TransportError::InvalidUrl(_))));
        }

        #[test]
        fn test_truncate_utf8_respects_char_boundaries() {
            let name = format!("{}é", "a".repeat(99));
            assert_eq!(name.len(), 101);
            assert_eq!(truncate_utf8(&name, 100), "a".repeat(99));
            assert_eq!(truncate_utf8("short", 100), "short");
            assert_eq!(truncate_utf8("🎨🎨", 5), "🎨");
        }

        #[test]
        fn test_send_before_connect() {
            let ws = NativeWebSocket::new();
            assert_eq!(ws.send("{}"), Err(TransportError::NotConnected));
        }

        #[test]
        fn test_unreachable_relay_reports_closed() {
            let mut ws = NativeWebSocket::new();
            // Port 9 (discard) is essentially never listening for WebSockets.
            ws.connect("ws://127.0.0.1:9/ws").unwrap();
            let mut events = Vec::new();
            for _ in 0..100 {
                events.extend(ws.poll_events());
                if events.contains(&TransportEvent::Closed) {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
            assert!(events.contains(&TransportEvent::Closed));
            assert!(!events.contains(&TransportEvent::Opened));
            // Released after close, so a new attempt is allowed.
            assert!(ws.connect("ws://127.0.0.1:9/ws").is_ok());
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

/// Platform-specific WebSocket client type.
#[cfg(target_arch = "wasm32")]
pub type PlatformWebSocket = WasmWebSocket;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
