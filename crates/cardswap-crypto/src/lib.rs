//! Cryptographic building blocks for cardswap.
//!
//! - `identity`: Ed25519 signing keypair with zeroizing storage
//! - `hash`: SHA-256 helpers and the shared public-key fingerprint
//! - `card`: canonical card payload, signed envelope, wire form
//! - `connection`: order-independent connection-id derivation
//!
//! Everything here is pure and synchronous.

#![forbid(unsafe_code)]

pub mod hash;
pub mod identity;

pub mod card;
pub mod connection;

#[cfg(test)]
mod proptests;

pub use card::{decode, encode, CardPayload, DecodeError, EncodeError, Envelope};
pub use connection::connection_id;
pub use hash::fingerprint;
pub use identity::{IdentityError, SigningKeyPair};
