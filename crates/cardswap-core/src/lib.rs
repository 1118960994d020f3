//! cardswap core - identity bootstrap and signed card exchange.
//!
//! This crate implements:
//! - Identity bootstrap over an external secure store
//! - The per-peer exchange state machine and its async orchestrator
//! - Deterministic connection records and the append-only ledger
//! - Configuration for the exchange

#![forbid(unsafe_code)]

// Core state machines
pub mod session;
pub mod exchange;

// Records
pub mod record;
pub mod ledger;

// Infrastructure
pub mod store;
pub mod keys;
pub mod config;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

pub use config::{AcceptPolicy, ExchangeConfig};
pub use errors::{KeyStoreError, SessionError};
pub use exchange::{ExchangeContext, ExchangeEvent, ExchangeOrchestrator, NoCardReason};
pub use keys::IdentityKeyStore;
pub use ledger::ConnectionLedger;
pub use record::{ConnectionRecord, RecordFactory};
pub use session::{CardIssuer, PeerSession, SessionState};
pub use store::{InMemorySecureStore, SecureStore, StoreError};
pub use types::LocalIdentity;
