//! Replication channel: connects a [`RoomSession`] to the relay.
//!
//! Delivery is best-effort and in order per connection. Messages queued while
//! the socket is down are dropped, not buffered; a rejoin snapshot repairs
//! the log afterwards. Reconnection uses a bounded number of attempts with a
//! fixed delay.

use crate::config::{ReconnectPolicy, SessionConfig};
use crate::input::{Instant, PointerEvent};
use crate::log::{ArrivalOrder, OrderingPolicy, RenderDirective};
use crate::protocol::ServerMessage;
use crate::session::{InboundEvent, RoomSession};
use crate::sync::{ConnectionState, Transport, TransportEvent};

/// Drives one session over one transport. Poll it from the frame loop.
pub struct ReplicationChannel<T, P = ArrivalOrder> {
    transport: T,
    session: RoomSession<P>,
    server_url: String,
    reconnect: ReconnectPolicy,
    state: ConnectionState,
    /// Consecutive failed or dropped connections.
    attempts: u32,
    retry_at: Option<Instant>,
}

impl<T: Transport> ReplicationChannel<T, ArrivalOrder> {
    pub fn new(config: &SessionConfig, transport: T) -> Self {
        Self::with_session(config, transport, RoomSession::new(config))
    }
}

impl<T: Transport, P: OrderingPolicy> ReplicationChannel<T, P> {
    /// Wrap an existing session (e.g. one with a custom ordering policy).
    pub fn with_session(config: &SessionConfig, transport: T, session: RoomSession<P>) -> Self {
        Self {
            transport,
            session,
            server_url: config.server_url.clone(),
            reconnect: config.reconnect,
            state: ConnectionState::Disconnected,
            attempts: 0,
            retry_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &RoomSession<P> {
        &self.session
    }

    /// Mutable session access for tool changes and clears. Queued messages
    /// go out on the next [`poll`](Self::poll).
    pub fn session_mut(&mut self) -> &mut RoomSession<P> {
        &mut self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start connecting. Returns any directives produced by an immediate failure.
    pub fn connect(&mut self, now: Instant) -> Vec<RenderDirective> {
        let mut directives = Vec::new();
        self.start_connect(now, &mut directives);
        directives
    }

    /// Give up after a failure and try again from a fresh retry budget.
    pub fn retry(&mut self, now: Instant) -> Vec<RenderDirective> {
        self.attempts = 0;
        self.connect(now)
    }

    /// Leave the room and close the socket without reconnecting.
    pub fn leave(&mut self) {
        if self.state == ConnectionState::Connected {
            self.session.leave();
            self.flush();
        }
        self.transport.disconnect();
        self.session.handle_inbound(InboundEvent::Disconnected);
        self.state = ConnectionState::Disconnected;
        self.retry_at = None;
    }

    /// Feed a local pointer event and send what it produced.
    pub fn pointer(&mut self, event: PointerEvent, now: Instant) -> Vec<RenderDirective> {
        let directives = self.session.handle_pointer(event, now);
        self.flush();
        directives
    }

    /// Process transport events, run due reconnects and flush outgoing messages.
    pub fn poll(&mut self, now: Instant) -> Vec<RenderDirective> {
        let mut directives = Vec::new();

        let retry_due = self.retry_at.is_some_and(|at| now >= at);
        if matches!(self.state, ConnectionState::Reconnecting { .. }) && retry_due {
            self.start_connect(now, &mut directives);
        }

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Opened => {
                    log::info!("connected to {}", self.server_url);
                    self.state = ConnectionState::Connected;
                    self.attempts = 0;
                    self.retry_at = None;
                    self.session.announce();
                }
                TransportEvent::Message(text) => match ServerMessage::decode(&text) {
                    Ok(msg) => directives.push(self.session.handle_inbound(msg.into())),
                    Err(e) => log::warn!("ignoring relay frame: {e}"),
                },
                TransportEvent::Error(message) => {
                    log::warn!("transport error: {message}");
                }
                TransportEvent::Closed => {
                    if matches!(
                        self.state,
                        ConnectionState::Connected | ConnectionState::Connecting
                    ) {
                        self.connection_lost(now, &mut directives);
                    }
                }
            }
        }

        self.flush();
        RenderDirective::coalesce(directives)
    }

    fn start_connect(&mut self, now: Instant, directives: &mut Vec<RenderDirective>) {
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        if let Err(e) = self.transport.connect(&self.server_url) {
            log::warn!("connect to {} failed: {e}", self.server_url);
            self.connection_lost(now, directives);
        }
    }

    fn connection_lost(&mut self, now: Instant, directives: &mut Vec<RenderDirective>) {
        self.transport.disconnect();
        directives.push(self.session.handle_inbound(InboundEvent::Disconnected));

        self.attempts += 1;
        if self.attempts > self.reconnect.max_attempts {
            log::error!(
                "giving up on {} after {} attempts",
                self.server_url,
                self.reconnect.max_attempts
            );
            self.state = ConnectionState::Failed;
            self.retry_at = None;
        } else {
            log::info!(
                "reconnecting to {} in {:?} (attempt {}/{})",
                self.server_url,
                self.reconnect.delay(),
                self.attempts,
                self.reconnect.max_attempts
            );
            self.state = ConnectionState::Reconnecting {
                attempt: self.attempts,
            };
            self.retry_at = Some(now + self.reconnect.delay());
        }
    }

    fn flush(&mut self) {
        if !self.session.has_outgoing() {
            return;
        }
        let outgoing = self.session.take_outgoing();
        if self.state != ConnectionState::Connected {
            log::debug!("dropping {} messages while {:?}", outgoing.len(), self.state);
            return;
        }
        for msg in outgoing {
            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("failed to encode message: {e}");
                    continue;
                }
            };
            if let Err(e) = self.transport.send(&text) {
                log::warn!("send failed: {e}");
            }
        }
    }
}
