use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// WebSocket close code for a policy violation (RFC 6455 §7.4.1).
pub const POLICY_VIOLATION: u16 = 1008;
pub const AUTH_TIMEOUT_REASON: &str = "Authentication timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the socket writer task is asked to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

/// Sending half of a control channel. Cloning shares the same channel; the
/// socket writer drains the paired receiver in order.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelHandle {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        Self::open_with_id(ConnectionId::new())
    }

    pub fn open_with_id(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a reply. Returns false once the writer side has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.tx.send(Outbound::Message(message)).is_err() {
            debug!(connection_id = %self.id, "dropping reply for closed channel");
            return false;
        }
        true
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
