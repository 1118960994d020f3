//! Per-peer exchange state machine.
//!
//! One `PeerSession` tracks a single handshake with a single peer:
//! send our signed card once the link is up, accept exactly one card back,
//! and end either recorded or rejected. The machine is synchronous and
//! does no I/O; the orchestrator drives it from the peer's task.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use cardswap_crypto::{decode, encode, CardPayload, DecodeError, Envelope, SigningKeyPair};
use cardswap_transport::PeerHandle;

use crate::errors::SessionError;
use crate::record::ConnectionRecord;
use crate::types::LocalIdentity;

// ============================================================================
// Card Issuer
// ============================================================================

/// Signs the local card. Shared read-only by every session.
#[derive(Clone)]
pub struct CardIssuer {
    identity: LocalIdentity,
    keys: Arc<SigningKeyPair>,
    display_name: String,
}

impl CardIssuer {
    pub fn new(
        identity: LocalIdentity,
        keys: Arc<SigningKeyPair>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            keys,
            display_name: display_name.into(),
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn fingerprint(&self) -> String {
        self.keys.fingerprint()
    }

    /// Signed card for `unix_timestamp`, in wire form.
    pub fn issue(&self, unix_timestamp: i64) -> Result<Vec<u8>, SessionError> {
        let card = CardPayload::new(
            self.identity.as_str(),
            self.display_name.as_str(),
            &self.keys,
            unix_timestamp,
        );
        encode(&card, &self.keys)
            .and_then(|envelope| envelope.to_wire())
            .map_err(|e| SessionError::Encode(e.to_string()))
    }
}

impl std::fmt::Debug for CardIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardIssuer")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("keys", &self.keys)
            .finish()
    }
}

// ============================================================================
// Session State Machine
// ============================================================================

/// State of one handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No link yet
    Idle,
    /// Link up, our card not yet delivered
    Connected,
    /// Our card was handed to the transport
    CardSent,
    /// A card arrived and passed verification; waiting to be recorded
    CardReceivedPending,
    /// Handshake complete
    Recorded { connection_id: String },
    /// The peer's card failed verification
    Rejected { reason: DecodeError },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connected => "connected",
            SessionState::CardSent => "card_sent",
            SessionState::CardReceivedPending => "card_received_pending",
            SessionState::Recorded { .. } => "recorded",
            SessionState::Rejected { .. } => "rejected",
        }
    }

    /// No further card will be accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Recorded { .. } | SessionState::Rejected { .. }
        )
    }

    /// A card may still arrive.
    pub fn accepts_card(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::CardSent)
    }
}

pub struct PeerSession {
    peer: PeerHandle,
    state: SessionState,
    /// Timestamp of the card we issued in this session, if any
    issued_card_ts: Option<i64>,
}

impl PeerSession {
    pub fn new(peer: PeerHandle) -> Self {
        Self {
            peer,
            state: SessionState::Idle,
            issued_card_ts: None,
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Link established: move to `Connected` and return our signed card.
    pub fn on_connected(
        &mut self,
        issuer: &CardIssuer,
        unix_timestamp: i64,
    ) -> Result<Vec<u8>, SessionError> {
        self.expect_state(matches!(self.state, SessionState::Idle), "on_connected")?;

        let wire = issuer.issue(unix_timestamp)?;
        self.issued_card_ts = Some(unix_timestamp);
        self.state = SessionState::Connected;
        Ok(wire)
    }

    /// The transport accepted our card.
    pub fn mark_card_sent(&mut self) -> Result<(), SessionError> {
        self.expect_state(
            matches!(self.state, SessionState::Connected),
            "mark_card_sent",
        )?;
        self.state = SessionState::CardSent;
        Ok(())
    }

    /// Bytes arrived from the peer. Returns the verified card.
    ///
    /// On any decode failure the session ends in `Rejected` and the bytes are
    /// dropped.
    pub fn on_data(&mut self, bytes: &[u8]) -> Result<CardPayload, SessionError> {
        self.expect_state(self.state.accepts_card(), "on_data")?;
        self.state = SessionState::CardReceivedPending;

        let decoded = Envelope::from_wire(bytes)
            .and_then(|envelope| decode(&envelope))
            .and_then(|card| match Utc.timestamp_opt(card.unix_timestamp, 0).single() {
                Some(_) => Ok(card),
                None => Err(DecodeError::MalformedPayload("ts out of range".into())),
            });

        match decoded {
            Ok(card) => Ok(card),
            Err(reason) => {
                self.state = SessionState::Rejected {
                    reason: reason.clone(),
                };
                Err(SessionError::Decode(reason))
            }
        }
    }

    /// Instant both sides agree on for this encounter.
    ///
    /// When we issued a card the earlier of the two card timestamps is used,
    /// which the peer derives identically from the same pair of cards.
    pub fn encounter_timestamp(&self, card: &CardPayload) -> i64 {
        match self.issued_card_ts {
            Some(ours) => ours.min(card.unix_timestamp),
            None => card.unix_timestamp,
        }
    }

    /// Instant handed to the record factory: the whole second from
    /// [`encounter_timestamp`](Self::encounter_timestamp) carrying the
    /// millisecond fraction of `captured`, so the display timestamp shows
    /// when the record was made without moving `unixTs`.
    pub fn encounter_time(&self, card: &CardPayload, captured: DateTime<Utc>) -> DateTime<Utc> {
        let millis = captured.timestamp_subsec_millis();
        // Both inputs were range-checked: ours comes from the clock, theirs
        // from on_data.
        Utc.timestamp_opt(self.encounter_timestamp(card), millis * 1_000_000)
            .single()
            .unwrap_or_default()
    }

    /// The record for this handshake was appended to the ledger.
    pub fn complete(&mut self, record: &ConnectionRecord) -> Result<(), SessionError> {
        self.expect_state(
            matches!(self.state, SessionState::CardReceivedPending),
            "complete",
        )?;
        self.state = SessionState::Recorded {
            connection_id: record.connection_id.clone(),
        };
        Ok(())
    }

    fn expect_state(&self, ok: bool, op: &str) -> Result<(), SessionError> {
        if ok {
            return Ok(());
        }
        debug!(peer = %self.peer, state = self.state.name(), op, "invalid transition");
        Err(SessionError::InvalidState(format!(
            "{op} not allowed in state {}",
            self.state.name()
        )))
    }
}
