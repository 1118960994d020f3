//! Ed25519 signing keypair for card signing.
//!
//! The keypair is generated once per installation and persisted by the
//! caller as its 32-byte secret seed. Secret material is zeroized on drop
//! (`SigningKey` does this internally) and seed exports are wrapped in
//! [`Zeroizing`].

use std::fmt;

use constant_time_eq::constant_time_eq;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::hash::fingerprint;

/// Size of an Ed25519 secret seed in bytes.
pub const SECRET_SEED_SIZE: usize = 32;

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Error type for keypair operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Long-lived Ed25519 signing keypair.
#[derive(Clone)]
pub struct SigningKeyPair {
    sign_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            sign_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from a persisted 32-byte secret seed.
    pub fn from_seed_bytes(seed: &[u8]) -> Result<Self, IdentityError> {
        let seed: &[u8; SECRET_SEED_SIZE] =
            seed.try_into().map_err(|_| IdentityError::InvalidKeyLength {
                expected: SECRET_SEED_SIZE,
                got: seed.len(),
            })?;
        Ok(Self {
            sign_key: SigningKey::from_bytes(seed),
        })
    }

    /// Export the secret seed for persistence.
    ///
    /// Only the identity key store should call this; the returned buffer is
    /// wiped when dropped.
    pub fn to_seed_bytes(&self) -> Zeroizing<[u8; SECRET_SEED_SIZE]> {
        Zeroizing::new(self.sign_key.to_bytes())
    }

    /// Raw Ed25519 public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.sign_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.sign_key.verifying_key()
    }

    /// Fingerprint of this keypair's public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_bytes())
    }

    /// Sign a message. Returns a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }
}

impl PartialEq for SigningKeyPair {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(
            self.to_seed_bytes().as_slice(),
            other.to_seed_bytes().as_slice(),
        )
    }
}

impl Eq for SigningKeyPair {}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Rebuild an Ed25519 verifying key from raw bytes.
///
/// Fails for wrong lengths and for byte strings that are not a valid
/// compressed Edwards point.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, IdentityError> {
    let arr: &[u8; PUBLIC_KEY_SIZE] =
        bytes.try_into().map_err(|_| IdentityError::InvalidKeyLength {
            expected: PUBLIC_KEY_SIZE,
            got: bytes.len(),
        })?;
    VerifyingKey::from_bytes(arr).map_err(|_| IdentityError::InvalidPublicKey)
}

/// Verify an Ed25519 signature with strict (non-malleable) checking.
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let sig_bytes: &[u8; SIGNATURE_SIZE] = signature
        .try_into()
        .map_err(|_| IdentityError::InvalidSignature)?;
    let sig = Signature::from_bytes(sig_bytes);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation_is_random() {
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
        assert_ne!(a, b);
    }

    #[test]
    fn test_seed_round_trip() {
        let original = SigningKeyPair::generate();
        let seed = original.to_seed_bytes();

        let restored = SigningKeyPair::from_seed_bytes(seed.as_slice()).unwrap();
        assert_eq!(original, restored);
        assert_eq!(original.public_key_bytes(), restored.public_key_bytes());
        assert_eq!(original.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_seed_wrong_length_rejected() {
        let err = SigningKeyPair::from_seed_bytes(&[1u8; 31]).unwrap_err();
        assert_eq!(
            err,
            IdentityError::InvalidKeyLength {
                expected: 32,
                got: 31
            }
        );
    }

    #[test]
    fn test_signature_round_trip() {
        let keys = SigningKeyPair::generate();
        let message = b"Hello, card!";

        let signature = keys.sign(message);
        assert!(verify_signature(&keys.verifying_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_signature_wrong_message_fails() {
        let keys = SigningKeyPair::generate();
        let signature = keys.sign(b"original");
        assert_eq!(
            verify_signature(&keys.verifying_key(), b"tampered", &signature),
            Err(IdentityError::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_wrong_key_fails() {
        let signer = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let signature = signer.sign(b"message");
        assert!(verify_signature(&other.verifying_key(), b"message", &signature).is_err());
    }

    #[test]
    fn test_short_signature_fails() {
        let keys = SigningKeyPair::generate();
        assert_eq!(
            verify_signature(&keys.verifying_key(), b"message", &[0u8; 63]),
            Err(IdentityError::InvalidSignature)
        );
    }

    #[test]
    fn test_verifying_key_from_bytes() {
        let keys = SigningKeyPair::generate();
        let vk = verifying_key_from_bytes(&keys.public_key_bytes()).unwrap();
        assert_eq!(vk, keys.verifying_key());

        assert!(matches!(
            verifying_key_from_bytes(&[0u8; 16]),
            Err(IdentityError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_debug_does_not_leak_seed() {
        let keys = SigningKeyPair::generate();
        let rendered = format!("{:?}", keys);
        assert!(rendered.contains(&keys.fingerprint()));
        assert!(!rendered.contains(&hex::encode(keys.to_seed_bytes().as_slice())));
    }
}
