//! In-memory loopback network for tests and the demo.
//!
//! Every endpoint registered on a [`LoopbackNetwork`] receives its
//! [`TransportEvent`]s through an unbounded channel, in the order the
//! network produced them. Links are symmetric; data can only flow over an
//! established link.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::traits::{PeerHandle, PeerTransport, TransportError, TransportEvent, TransportType};

/// Receiving half handed to the owner of an endpoint.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<PeerHandle, mpsc::UnboundedSender<TransportEvent>>,
    links: Mutex<HashSet<(PeerHandle, PeerHandle)>>,
}

impl NetworkInner {
    fn emit(&self, to: &PeerHandle, event: TransportEvent) -> Result<(), TransportError> {
        let tx = self
            .endpoints
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        tx.send(event).map_err(|_| TransportError::Disconnected)
    }

    fn is_linked(&self, a: &PeerHandle, b: &PeerHandle) -> bool {
        self.links.lock().contains(&link_key(a, b))
    }
}

fn link_key(a: &PeerHandle, b: &PeerHandle) -> (PeerHandle, PeerHandle) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its transport plus event stream.
    pub fn endpoint(&self, name: impl Into<String>) -> (LoopbackTransport, EventReceiver) {
        let local = PeerHandle::new(name);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.endpoints.insert(local.clone(), tx);

        let transport = LoopbackTransport {
            local,
            network: self.inner.clone(),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        };
        (transport, rx)
    }

    /// Make `a` and `b` visible to each other.
    pub fn discover(&self, a: &PeerHandle, b: &PeerHandle) -> Result<(), TransportError> {
        self.inner.emit(a, TransportEvent::PeerFound(b.clone()))?;
        self.inner.emit(b, TransportEvent::PeerFound(a.clone()))
    }

    /// Hide `a` and `b` from each other.
    pub fn lose(&self, a: &PeerHandle, b: &PeerHandle) -> Result<(), TransportError> {
        self.inner.emit(a, TransportEvent::PeerLost(b.clone()))?;
        self.inner.emit(b, TransportEvent::PeerLost(a.clone()))
    }

    /// Establish a link and notify both sides.
    pub fn connect(&self, a: &PeerHandle, b: &PeerHandle) -> Result<(), TransportError> {
        self.inner.links.lock().insert(link_key(a, b));
        self.inner.emit(a, TransportEvent::PeerConnected(b.clone()))?;
        self.inner.emit(b, TransportEvent::PeerConnected(a.clone()))
    }

    /// Tear down a link and notify both sides.
    pub fn disconnect(&self, a: &PeerHandle, b: &PeerHandle) -> Result<(), TransportError> {
        self.inner.links.lock().remove(&link_key(a, b));
        self.inner.emit(a, TransportEvent::PeerDisconnected(b.clone()))?;
        self.inner.emit(b, TransportEvent::PeerDisconnected(a.clone()))
    }

    /// Deliver raw bytes to `to` as if they came from `from`, bypassing the
    /// sender's transport. Used to simulate corrupted or forged traffic.
    pub fn inject(
        &self,
        from: &PeerHandle,
        to: &PeerHandle,
        bytes: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        self.inner.emit(
            to,
            TransportEvent::DataReceived {
                from: from.clone(),
                bytes: bytes.into(),
            },
        )
    }
}

/// One endpoint's outbound half.
pub struct LoopbackTransport {
    local: PeerHandle,
    network: Arc<NetworkInner>,
    sent: Mutex<Vec<(/* recipients */ Vec<PeerHandle>, /* data */ Vec<u8>)>>,
    fail_sends: AtomicBool,
    latency: Mutex<Duration>,
}

impl LoopbackTransport {
    pub fn local(&self) -> &PeerHandle {
        &self.local
    }

    /// Make every following `send` fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Delay every following `send` by `latency` before it is delivered.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Get sent messages
    pub fn get_sent(&self) -> Vec<(Vec<PeerHandle>, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send(&self, data: &[u8], to: &[PeerHandle]) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::SendFailed("simulated failure".to_string()));
        }

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }

        for peer in to {
            if !self.network.is_linked(&self.local, peer) {
                return Err(TransportError::UnknownPeer(peer.to_string()));
            }
        }

        for peer in to {
            self.network.emit(
                peer,
                TransportEvent::DataReceived {
                    from: self.local.clone(),
                    bytes: Bytes::copy_from_slice(data),
                },
            )?;
        }

        debug!(from = %self.local, recipients = to.len(), len = data.len(), "loopback send");
        self.sent.lock().push((to.to_vec(), data.to_vec()));
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_send() {
        let net = LoopbackNetwork::new();
        let (alice, mut alice_rx) = net.endpoint("alice");
        let (_bob, mut bob_rx) = net.endpoint("bob");
        let (a, b) = (PeerHandle::from("alice"), PeerHandle::from("bob"));

        net.connect(&a, &b).unwrap();
        assert_eq!(
            alice_rx.recv().await.unwrap(),
            TransportEvent::PeerConnected(b.clone())
        );
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            TransportEvent::PeerConnected(a.clone())
        );

        alice.send(b"hello", &[b.clone()]).await.unwrap();
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            TransportEvent::DataReceived {
                from: a,
                bytes: Bytes::from_static(b"hello"),
            }
        );
        assert_eq!(alice.get_sent().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_link_fails() {
        let net = LoopbackNetwork::new();
        let (alice, _alice_rx) = net.endpoint("alice");
        let (_bob, _bob_rx) = net.endpoint("bob");

        let err = alice.send(b"x", &[PeerHandle::from("bob")]).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownPeer("bob".into()));
        assert!(alice.get_sent().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let net = LoopbackNetwork::new();
        let (alice, _alice_rx) = net.endpoint("alice");
        let (_bob, _bob_rx) = net.endpoint("bob");
        net.connect(&"alice".into(), &"bob".into()).unwrap();

        alice.set_fail_sends(true);
        assert!(matches!(
            alice.send(b"x", &["bob".into()]).await,
            Err(TransportError::SendFailed(_))
        ));

        alice.set_fail_sends(false);
        assert!(alice.send(b"x", &["bob".into()]).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_removes_link() {
        let net = LoopbackNetwork::new();
        let (alice, mut alice_rx) = net.endpoint("alice");
        let (_bob, _bob_rx) = net.endpoint("bob");
        let (a, b) = (PeerHandle::from("alice"), PeerHandle::from("bob"));

        net.discover(&a, &b).unwrap();
        net.connect(&a, &b).unwrap();
        net.disconnect(&a, &b).unwrap();

        assert_eq!(alice_rx.recv().await, Some(TransportEvent::PeerFound(b.clone())));
        assert_eq!(alice_rx.recv().await, Some(TransportEvent::PeerConnected(b.clone())));
        assert_eq!(alice_rx.recv().await, Some(TransportEvent::PeerDisconnected(b.clone())));
        assert!(alice.send(b"x", &[b]).await.is_err());
    }

    #[tokio::test]
    async fn test_inject_bypasses_link() {
        let net = LoopbackNetwork::new();
        let (_bob, mut bob_rx) = net.endpoint("bob");

        net.inject(&"mallory".into(), &"bob".into(), &b"junk"[..]).unwrap();
        match bob_rx.recv().await.unwrap() {
            TransportEvent::DataReceived { from, bytes } => {
                assert_eq!(from.as_str(), "mallory");
                assert_eq!(bytes.as_ref(), b"junk");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lose_hides_both_sides() {
        let net = LoopbackNetwork::new();
        let (_alice, mut alice_rx) = net.endpoint("alice");
        let (_bob, mut bob_rx) = net.endpoint("bob");
        let (a, b) = (PeerHandle::from("alice"), PeerHandle::from("bob"));

        net.discover(&a, &b).unwrap();
        net.lose(&a, &b).unwrap();

        assert_eq!(alice_rx.recv().await, Some(TransportEvent::PeerFound(b.clone())));
        assert_eq!(alice_rx.recv().await, Some(TransportEvent::PeerLost(b)));
        assert_eq!(bob_rx.recv().await, Some(TransportEvent::PeerFound(a.clone())));
        assert_eq!(bob_rx.recv().await, Some(TransportEvent::PeerLost(a)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_delivery() {
        let net = LoopbackNetwork::new();
        let (alice, _alice_rx) = net.endpoint("alice");
        let (_bob, mut bob_rx) = net.endpoint("bob");
        net.connect(&"alice".into(), &"bob".into()).unwrap();
        bob_rx.recv().await.unwrap();

        alice.set_latency(Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        alice.send(b"slow", &["bob".into()]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(
            bob_rx.recv().await,
            Some(TransportEvent::DataReceived { .. })
        ));
    }
}
