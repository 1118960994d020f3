//! Exchange orchestrator.
//!
//! Routes transport events to per-peer session tasks. Each connected peer
//! gets its own tokio task fed by an ordered channel, so one peer's events
//! are handled in delivery order while different peers run concurrently.
//! Outcomes are published on a broadcast channel as [`ExchangeEvent`]s.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use cardswap_crypto::{DecodeError, SigningKeyPair};
use cardswap_transport::{EventReceiver, PeerHandle, PeerTransport, TransportError, TransportEvent};

use crate::config::ExchangeConfig;
use crate::errors::SessionError;
use crate::ledger::ConnectionLedger;
use crate::record::{ConnectionRecord, RecordFactory};
use crate::session::{CardIssuer, PeerSession, SessionState};
use crate::types::LocalIdentity;

// ============================================================================
// Events
// ============================================================================

/// Why a handshake ended without a card from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoCardReason {
    /// The transport reported the peer gone
    Disconnected,
    /// The handshake timeout elapsed
    TimedOut,
    /// A newer connection to the same peer replaced this one
    Superseded,
    /// The orchestrator was shut down before the handshake could finish
    Shutdown,
}

/// Observable outcome of exchange activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// Our card was handed to the transport
    CardSent { peer: PeerHandle },
    /// Our card could not be sent; the session keeps waiting for theirs
    SendFailed {
        peer: PeerHandle,
        error: TransportError,
    },
    /// A verified card was recorded in the ledger
    Recorded {
        peer: PeerHandle,
        record: ConnectionRecord,
    },
    /// The peer's card failed verification
    Rejected { peer: PeerHandle, error: DecodeError },
    /// The session ended before any card arrived
    NoCardReceived {
        peer: PeerHandle,
        reason: NoCardReason,
    },
    /// Data arrived from a peer with no live session
    UnexpectedData { peer: PeerHandle },
    /// The accept policy turned the peer away
    InvitationDeclined { peer: PeerHandle },
}

impl ExchangeEvent {
    pub fn peer(&self) -> &PeerHandle {
        match self {
            ExchangeEvent::CardSent { peer }
            | ExchangeEvent::SendFailed { peer, .. }
            | ExchangeEvent::Recorded { peer, .. }
            | ExchangeEvent::Rejected { peer, .. }
            | ExchangeEvent::NoCardReceived { peer, .. }
            | ExchangeEvent::UnexpectedData { peer }
            | ExchangeEvent::InvitationDeclined { peer } => peer,
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything the orchestrator needs, passed in explicitly.
pub struct ExchangeContext {
    pub identity: LocalIdentity,
    pub keys: Arc<SigningKeyPair>,
    pub transport: Arc<dyn PeerTransport>,
    pub ledger: ConnectionLedger,
    pub config: ExchangeConfig,
    pub factory: RecordFactory,
}

impl ExchangeContext {
    pub fn new(
        identity: LocalIdentity,
        keys: Arc<SigningKeyPair>,
        transport: Arc<dyn PeerTransport>,
        ledger: ConnectionLedger,
    ) -> Self {
        Self {
            identity,
            keys,
            transport,
            ledger,
            config: ExchangeConfig::default(),
            factory: RecordFactory::new(),
        }
    }

    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_record_factory(mut self, factory: RecordFactory) -> Self {
        self.factory = factory;
        self
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Message delivered to a session task, in transport order.
#[derive(Debug)]
enum PeerMsg {
    Data(Bytes),
    Disconnected,
}

struct SessionSlot {
    tx: mpsc::UnboundedSender<PeerMsg>,
    generation: u64,
}

struct Shared {
    issuer: CardIssuer,
    transport: Arc<dyn PeerTransport>,
    ledger: ConnectionLedger,
    factory: RecordFactory,
    config: ExchangeConfig,
    sessions: DashMap<PeerHandle, SessionSlot>,
    discovered: DashSet<PeerHandle>,
    events: broadcast::Sender<ExchangeEvent>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    drained: Notify,
}

impl Shared {
    fn publish(&self, event: ExchangeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Drives card exchanges for every peer on one transport.
#[derive(Clone)]
pub struct ExchangeOrchestrator {
    shared: Arc<Shared>,
}

impl ExchangeOrchestrator {
    pub fn new(ctx: ExchangeContext) -> Self {
        let (events, _) = broadcast::channel(ctx.config.event_buffer.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let issuer = CardIssuer::new(ctx.identity, ctx.keys, ctx.config.display_name.clone());

        Self {
            shared: Arc::new(Shared {
                issuer,
                transport: ctx.transport,
                ledger: ctx.ledger,
                factory: ctx.factory,
                config: ctx.config,
                sessions: DashMap::new(),
                discovered: DashSet::new(),
                events,
                next_generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
                drained: Notify::new(),
            }),
        }
    }

    pub fn local_identity(&self) -> &LocalIdentity {
        self.shared.issuer.identity()
    }

    pub fn ledger(&self) -> &ConnectionLedger {
        &self.shared.ledger
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.shared.config
    }

    /// Receive exchange outcomes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.shared.events.subscribe()
    }

    /// Whether an inbound connection from `peer` should be accepted.
    pub fn accept_invitation(&self, peer: &PeerHandle) -> bool {
        self.shared.config.accept_policy.allows(peer)
    }

    /// Peers currently visible through discovery.
    pub fn discovered_peers(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<_> = self.shared.discovered.iter().map(|p| p.clone()).collect();
        peers.sort();
        peers
    }

    /// Peers with a handshake in progress.
    pub fn active_sessions(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<_> = self.shared.sessions.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    pub fn has_session(&self, peer: &PeerHandle) -> bool {
        self.shared.sessions.contains_key(peer)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Route one transport event. Must be called from within a tokio runtime.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound(peer) => {
                debug!(peer = %peer, "peer found");
                self.shared.discovered.insert(peer);
            }
            TransportEvent::PeerLost(peer) => {
                debug!(peer = %peer, "peer lost");
                self.shared.discovered.remove(&peer);
            }
            TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer),
            TransportEvent::PeerDisconnected(peer) => {
                let delivered = self
                    .shared
                    .sessions
                    .get(&peer)
                    .map(|slot| slot.tx.send(PeerMsg::Disconnected).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!(peer = %peer, "disconnect without live session");
                }
            }
            TransportEvent::DataReceived { from, bytes } => {
                let delivered = self
                    .shared
                    .sessions
                    .get(&from)
                    .map(|slot| slot.tx.send(PeerMsg::Data(bytes)).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!(peer = %from, "data without live session");
                    self.shared
                        .publish(ExchangeEvent::UnexpectedData { peer: from });
                }
            }
        }
    }

    /// Consume transport events until the stream ends, or until `shutdown`
    /// was called and every remaining session has ended.
    pub async fn run(&self, mut events: EventReceiver) {
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        loop {
            if self.is_shut_down() && self.shared.sessions.is_empty() {
                debug!("exchange drained");
                break;
            }
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("transport event stream closed");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {}
                _ = self.shared.drained.notified() => {}
            }
        }
    }

    /// Stop accepting connections.
    ///
    /// Handshakes that already sent their card keep receiving data for up
    /// to `shutdown_grace_secs` (never past their own handshake deadline).
    /// Every other handshake ends with [`NoCardReason::Shutdown`].
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(sessions = self.shared.sessions.len(), "exchange shutting down");
        self.shared.shutdown_tx.send_replace(true);
    }

    fn on_peer_connected(&self, peer: PeerHandle) {
        if self.is_shut_down() {
            debug!(peer = %peer, "ignoring connection during shutdown");
            return;
        }

        if !self.accept_invitation(&peer) {
            info!(peer = %peer, "invitation declined by accept policy");
            self.shared
                .publish(ExchangeEvent::InvitationDeclined { peer });
            return;
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        // Replacing the slot drops the old sender; that session sees its
        // channel close and reports Superseded.
        if self
            .shared
            .sessions
            .insert(peer.clone(), SessionSlot { tx, generation })
            .is_some()
        {
            debug!(peer = %peer, "restarting session");
        }

        // shutdown() may have started between the check above and the insert.
        if self.is_shut_down() {
            self.shared
                .sessions
                .remove_if(&peer, |_, slot| slot.generation == generation);
            self.shared.drained.notify_one();
            debug!(peer = %peer, "ignoring connection during shutdown");
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_session(shared, peer, generation, rx).await;
        });
    }
}

// ============================================================================
// Session Task
// ============================================================================

async fn run_session(
    shared: Arc<Shared>,
    peer: PeerHandle,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<PeerMsg>,
) {
    let mut session = PeerSession::new(peer.clone());
    let outcome = drive_session(&shared, &mut session, &mut rx).await;

    // Unregister before publishing the outcome so anything routed to this
    // peer afterwards is reported as unexpected.
    rx.close();
    shared
        .sessions
        .remove_if(&peer, |_, slot| slot.generation == generation);
    while let Ok(msg) = rx.try_recv() {
        if let PeerMsg::Data(_) = msg {
            shared.publish(ExchangeEvent::UnexpectedData { peer: peer.clone() });
        }
    }

    debug!(peer = %peer, state = session.state().name(), "session ended");
    if let Some(event) = outcome {
        shared.publish(event);
    }
    if shared.shutting_down.load(Ordering::SeqCst) {
        shared.drained.notify_one();
    }
}

/// What woke a waiting session.
enum Wake {
    Msg(Option<PeerMsg>),
    Deadline,
    Shutdown,
}

/// Run one handshake. Returns the final event, if any.
async fn drive_session(
    shared: &Shared,
    session: &mut PeerSession,
    rx: &mut mpsc::UnboundedReceiver<PeerMsg>,
) -> Option<ExchangeEvent> {
    let peer = session.peer().clone();
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    if *shutdown_rx.borrow() {
        return Some(ExchangeEvent::NoCardReceived {
            peer,
            reason: NoCardReason::Shutdown,
        });
    }

    let wire = match session.on_connected(&shared.issuer, Utc::now().timestamp()) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(peer = %peer, error = %e, "could not issue card");
            return None;
        }
    };

    let sent = timeout(
        shared.config.send_timeout(),
        shared.transport.send(&wire, std::slice::from_ref(&peer)),
    )
    .await
    .unwrap_or(Err(TransportError::Timeout));

    match sent {
        Ok(()) => {
            if let Err(e) = session.mark_card_sent() {
                debug!(peer = %peer, error = %e, "mark_card_sent");
            }
            debug!(peer = %peer, "card sent");
            shared.publish(ExchangeEvent::CardSent { peer: peer.clone() });
        }
        Err(error) => {
            warn!(peer = %peer, error = %error, "card send failed");
            shared.publish(ExchangeEvent::SendFailed {
                peer: peer.clone(),
                error,
            });
        }
    }

    let mut deadline = shared.config.handshake_timeout().map(|d| Instant::now() + d);
    let mut draining = false;

    loop {
        let wake = tokio::select! {
            biased;
            msg = rx.recv() => Wake::Msg(msg),
            _ = shutdown_rx.wait_for(|down| *down), if !draining => Wake::Shutdown,
            _ = wait_until(deadline) => Wake::Deadline,
        };

        match wake {
            Wake::Msg(Some(PeerMsg::Data(bytes))) => {
                if let Some(event) = handle_data(shared, session, &bytes) {
                    return Some(event);
                }
            }
            Wake::Msg(Some(PeerMsg::Disconnected)) => {
                debug!(peer = %peer, "peer disconnected before sending a card");
                return Some(ExchangeEvent::NoCardReceived {
                    peer,
                    reason: NoCardReason::Disconnected,
                });
            }
            Wake::Msg(None) => {
                let reason = if shared.shutting_down.load(Ordering::SeqCst) {
                    NoCardReason::Shutdown
                } else {
                    NoCardReason::Superseded
                };
                debug!(peer = %peer, ?reason, "session channel closed");
                return Some(ExchangeEvent::NoCardReceived { peer, reason });
            }
            Wake::Shutdown => {
                if *session.state() != SessionState::CardSent {
                    return Some(ExchangeEvent::NoCardReceived {
                        peer,
                        reason: NoCardReason::Shutdown,
                    });
                }
                let grace = Instant::now() + shared.config.shutdown_grace();
                deadline = Some(deadline.map_or(grace, |d| d.min(grace)));
                draining = true;
                debug!(peer = %peer, "draining handshake");
            }
            Wake::Deadline => {
                let reason = if draining {
                    NoCardReason::Shutdown
                } else {
                    NoCardReason::TimedOut
                };
                info!(peer = %peer, ?reason, "handshake timed out");
                return Some(ExchangeEvent::NoCardReceived { peer, reason });
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Returns the final event once the handshake reached a terminal state.
fn handle_data(
    shared: &Shared,
    session: &mut PeerSession,
    bytes: &[u8],
) -> Option<ExchangeEvent> {
    let peer = session.peer().clone();

    let card = match session.on_data(bytes) {
        Ok(card) => card,
        Err(SessionError::Decode(error)) => {
            warn!(
                peer = %peer,
                error = %error,
                auth_failure = error.is_authentication_failure(),
                "rejected peer card"
            );
            return Some(ExchangeEvent::Rejected { peer, error });
        }
        Err(e) => {
            debug!(peer = %peer, error = %e, "ignoring data");
            return None;
        }
    };

    let record = shared.factory.create(
        shared.transport.transport_type().method_name(),
        shared.issuer.identity().as_str(),
        &card.user_id,
        &card.display_name,
        &card.public_key_fingerprint_hex,
        session.encounter_time(&card, Utc::now()),
    );
    shared.ledger.append(record.clone());
    if let Err(e) = session.complete(&record) {
        debug!(peer = %peer, error = %e, "complete");
    }

    info!(
        peer = %peer,
        peer_user_id = %record.peer_user_id,
        connection_id = %record.connection_id,
        method = %record.method,
        "connection recorded"
    );
    Some(ExchangeEvent::Recorded { peer, record })
}
