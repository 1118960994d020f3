//! Error types for cardswap core.
//!
//! Only identity bootstrap failures are fatal. Everything that goes wrong
//! during a single exchange stays inside that peer's session.

use thiserror::Error;

use cardswap_crypto::DecodeError;

use crate::store::StoreError;

/// Identity bootstrap failure. Fatal: the process must not continue with a
/// throwaway identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("identity store unavailable: {0}")]
    Unavailable(#[from] StoreError),

    #[error("corrupt identity entry '{account}': {reason}")]
    Corrupt {
        account: &'static str,
        reason: String,
    },
}

/// Per-session failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("card rejected: {0}")]
    Decode(#[from] DecodeError),

    #[error("card encoding failed: {0}")]
    Encode(String),
}
