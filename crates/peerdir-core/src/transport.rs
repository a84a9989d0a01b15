//! Outbound datagram hook
//!
//! The core never opens sockets. Everything it wants to send goes through a
//! [`Transport`], which is expected to queue and return immediately. Send
//! failures are soft: callers log them and move on.

use tokio::sync::mpsc;

use crate::error::{DirectoryError, DirectoryResult};

/// Message type carrying a gossip payload
pub const PEER_SYNC: &str = "PEER_SYNC";

/// Liveness probe
pub const PING: &str = "PING";

/// Probe reply
pub const PONG: &str = "PONG";

/// Payload of a probe sent after learning about a peer through gossip
pub const PROBE_PAYLOAD: &str = "gossip_discovery";

/// Fire-and-forget datagram sender
pub trait Transport: Send + Sync {
    /// Queue `payload` for delivery to `address`
    fn send_datagram(&self, address: &str, message_type: &str, payload: &str)
        -> DirectoryResult<()>;
}

/// A datagram queued by [`ChannelTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDatagram {
    pub address: String,
    pub message_type: String,
    pub payload: String,
}

impl OutboundDatagram {
    pub fn is_probe(&self) -> bool {
        self.message_type == PING
    }
}

/// Transport that pushes datagrams into an unbounded mpsc queue
///
/// The receiving half is drained by a socket adapter, or by tests asserting
/// on what would have been sent.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundDatagram>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundDatagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send_datagram(
        &self,
        address: &str,
        message_type: &str,
        payload: &str,
    ) -> DirectoryResult<()> {
        self.tx
            .send(OutboundDatagram {
                address: address.to_string(),
                message_type: message_type.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|_| DirectoryError::Transport("Outbound queue closed".to_string()))
    }
}
