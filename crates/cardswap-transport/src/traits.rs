//! Transport traits and event types consumed by the exchange core.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

/// Opaque handle naming a peer on the local transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub String);

impl PeerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerHandle {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Transport type identifier. Recorded as the `method` of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Local-network peer-to-peer sessions (Wi-Fi / Bluetooth discovery)
    Multipeer,
    /// In-process loopback, used by tests and the demo
    Loopback,
}

impl TransportType {
    /// Stable name written into connection records.
    pub fn method_name(&self) -> &'static str {
        match self {
            TransportType::Multipeer => "multipeer",
            TransportType::Loopback => "loopback",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// Events emitted by the transport. Delivery may happen on any task and
/// events for different peers may interleave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer became visible through discovery
    PeerFound(PeerHandle),
    /// A previously discovered peer is no longer visible
    PeerLost(PeerHandle),
    /// A session with the peer is established and can carry data
    PeerConnected(PeerHandle),
    /// The session with the peer ended
    PeerDisconnected(PeerHandle),
    /// Opaque bytes arrived from a connected peer
    DataReceived { from: PeerHandle, bytes: Bytes },
}

impl TransportEvent {
    /// Peer this event concerns.
    pub fn peer(&self) -> &PeerHandle {
        match self {
            TransportEvent::PeerFound(p)
            | TransportEvent::PeerLost(p)
            | TransportEvent::PeerConnected(p)
            | TransportEvent::PeerDisconnected(p) => p,
            TransportEvent::DataReceived { from, .. } => from,
        }
    }
}

/// Outbound half of the transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send bytes to each listed peer. Retry policy belongs to the transport.
    async fn send(&self, data: &[u8], to: &[PeerHandle]) -> Result<(), TransportError>;

    /// Get transport type identifier
    fn transport_type(&self) -> TransportType;
}

/// Common transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_are_stable() {
        assert_eq!(TransportType::Multipeer.method_name(), "multipeer");
        assert_eq!(TransportType::Loopback.to_string(), "loopback");
    }

    #[test]
    fn test_event_peer() {
        let peer = PeerHandle::from("phone");
        let evt = TransportEvent::DataReceived {
            from: peer.clone(),
            bytes: Bytes::from_static(b"x"),
        };
        assert_eq!(evt.peer(), &peer);
        assert_eq!(TransportEvent::PeerLost(peer.clone()).peer(), &peer);
    }
}
