//! Events queued for the bot loop.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionDelegate, ConnectionError, LineWriter};
use crate::handshake::HandshakeDelegate;

/// Everything the bot loop reacts to, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// A socket to one of the servers was established.
    Connected,

    /// One connection attempt failed; another will follow.
    ConnectFailed,

    /// One received protocol line.
    Line(String),

    /// The server went away.
    Disconnected,

    /// Registration is complete and all channels have been joined.
    /// `nickname` is our confirmed nick.
    Registered { nickname: String },

    /// `Bot::shutdown` was called.
    Shutdown,
}

/// Turns connection callbacks into queued [`Event`]s.
pub(crate) struct EventForwarder {
    events: mpsc::UnboundedSender<Event>,
}

impl EventForwarder {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self { events }
    }

    fn send(&self, event: Event) {
        // The loop only goes away on shutdown, at which point nobody cares.
        let _ = self.events.send(event);
    }
}

impl ConnectionDelegate for EventForwarder {
    fn on_connection_established(&self) {
        self.send(Event::Connected);
    }

    fn on_connection_failed(&self) {
        self.send(Event::ConnectFailed);
    }

    fn on_connection_message(&self, line: &str) {
        self.send(Event::Line(line.to_string()));
    }

    fn on_connection_closed(&self) {
        self.send(Event::Disconnected);
    }
}

/// What the handshake writes through and reports completion to.
pub(crate) struct HandshakeSink {
    connection: Arc<Connection>,
    events: mpsc::UnboundedSender<Event>,
}

impl HandshakeSink {
    pub(crate) fn new(connection: Arc<Connection>, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { connection, events }
    }
}

impl LineWriter for HandshakeSink {
    fn write(&self, line: &str) -> Result<(), ConnectionError> {
        self.connection.write(line)
    }
}

impl HandshakeDelegate for HandshakeSink {
    fn on_handshake_completed(&self, nickname: &str) {
        let _ = self.events.send(Event::Registered {
            nickname: nickname.to_string(),
        });
    }
}
