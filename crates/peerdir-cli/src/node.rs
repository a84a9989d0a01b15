//! UDP node for `peerdir serve`
//!
//! Bridges the core's outbound queue to a UDP socket. Every datagram is
//! wrapped in a signed envelope; inbound envelopes are verified before the
//! sender is recorded as a direct contact and the body is dispatched.

use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use peerdir_core::transport::{PEER_SYNC, PING, PONG, PROBE_PAYLOAD};
use peerdir_core::{
    now_millis, DirectoryBackend, InboundOutcome, NodeRecord, OutboundDatagram, PeerDirectory,
    SignedDatagram,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Largest datagram accepted
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Resolve a transport address, adding `default_port` to a bare IP
pub fn socket_addr(address: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Some(addr);
    }
    address
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

pub struct UdpNode<B> {
    directory: PeerDirectory<B>,
    socket: UdpSocket,
    outbound: UnboundedReceiver<OutboundDatagram>,
    peer_port: u16,
}

impl<B: DirectoryBackend + 'static> UdpNode<B> {
    pub fn new(
        directory: PeerDirectory<B>,
        socket: UdpSocket,
        outbound: UnboundedReceiver<OutboundDatagram>,
        peer_port: u16,
    ) -> Self {
        Self {
            directory,
            socket,
            outbound,
            peer_port,
        }
    }

    /// Run until Ctrl-C
    pub async fn run(mut self) -> Result<()> {
        let gossip = self.directory.start_gossip();
        let maintenance = self.directory.spawn_maintenance();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("Received shutdown signal...");
                    break;
                }
                Some(datagram) = self.outbound.recv() => {
                    self.send(&datagram).await;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.receive(&buf[..len], from).await,
                        Err(e) => warn!(error = %e, "UDP receive failed"),
                    }
                }
            }
        }

        gossip.shutdown().await;
        maintenance.shutdown().await;
        Ok(())
    }

    async fn send(&self, datagram: &OutboundDatagram) {
        let Some(target) = socket_addr(&datagram.address, self.peer_port) else {
            warn!(address = %datagram.address, "Unparseable peer address");
            return;
        };
        let sealed =
            SignedDatagram::seal(self.directory.keypair(), &datagram.message_type, &datagram.payload);
        let bytes = match sealed.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, target).await {
            warn!(target = %target, error = %e, "UDP send failed");
        } else {
            debug!(target = %target, kind = %datagram.message_type, "Datagram sent");
        }
    }

    async fn receive(&self, bytes: &[u8], from: SocketAddr) {
        let envelope = match SignedDatagram::open(bytes, now_millis()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(from = %from, error = %e, "Dropping unauthenticated datagram");
                return;
            }
        };
        if envelope.from == self.directory.local_identity() {
            return;
        }

        let gossip = self.directory.gossip();
        gossip.mark_active(envelope.from.clone(), from.to_string());
        let contact = NodeRecord::new(envelope.from.clone(), envelope.pubkey.clone())
            .with_address(from.ip().to_string(), from.port());
        if let Err(e) = self.directory.record_direct_contact(&contact) {
            warn!(peer = %envelope.from, error = %e, "Failed to record direct contact");
        }

        match envelope.message_type.as_str() {
            PEER_SYNC => match gossip.handle_incoming(&envelope.data, &envelope.from) {
                InboundOutcome::Processed(summary) => info!(
                    peer = %envelope.from,
                    applied = summary.applied,
                    discovered = summary.discovered,
                    "Merged gossip"
                ),
                outcome => debug!(peer = %envelope.from, ?outcome, "Gossip not merged"),
            },
            PING => {
                debug!(peer = %envelope.from, body = %envelope.data, "Probe received");
                let reply = OutboundDatagram {
                    address: from.to_string(),
                    message_type: PONG.to_string(),
                    payload: PROBE_PAYLOAD.to_string(),
                };
                self.send(&reply).await;
            }
            PONG => debug!(peer = %envelope.from, "Probe answered"),
            other => debug!(peer = %envelope.from, kind = %other, "Ignoring unknown message type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_with_and_without_port() {
        assert_eq!(
            socket_addr("1.2.3.4:9000", 8888),
            Some("1.2.3.4:9000".parse().unwrap())
        );
        assert_eq!(
            socket_addr("1.2.3.4", 8888),
            Some("1.2.3.4:8888".parse().unwrap())
        );
        assert_eq!(socket_addr("::1", 8888), Some("[::1]:8888".parse().unwrap()));
        assert_eq!(socket_addr("not an address", 8888), None);
    }
}
