//! Identity card codec.
//!
//! A card is the claim a device makes about itself at send time. It is
//! serialized to a canonical JSON byte form (fixed key order, compact) and
//! signed with the sender's Ed25519 key. The wire envelope carries the exact
//! payload bytes next to the signature; verification always runs over those
//! bytes and never over a re-serialization.
//!
//! The verifying key comes from the payload itself: a successful decode
//! proves "this payload was produced by the holder of the private key
//! matching the embedded public key", not that the key is known or trusted.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hash::fingerprint;
use crate::identity::{verify_signature, verifying_key_from_bytes, SigningKeyPair, PUBLIC_KEY_SIZE};

// ============================================================================
// Error Types
// ============================================================================

/// Reasons an incoming envelope is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing or mistyped field: {0}")]
    MissingField(&'static str),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("fingerprint does not match embedded public key")]
    FingerprintMismatch,
    #[error("signature verification failed")]
    SignatureInvalid,
}

impl DecodeError {
    /// True when the envelope parsed but failed authentication, i.e. it was
    /// corrupted in transit or forged.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            DecodeError::SignatureInvalid | DecodeError::FingerprintMismatch
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("card serialization failed: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

// ============================================================================
// Data Model
// ============================================================================

/// Self-asserted identity claim sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPayload {
    pub user_id: String,
    pub display_name: String,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub public_key_fingerprint_hex: String,
    pub unix_timestamp: i64,
}

impl CardPayload {
    /// Build a fresh card for `keys`, deriving the fingerprint.
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        keys: &SigningKeyPair,
        unix_timestamp: i64,
    ) -> Self {
        let public_key = keys.public_key_bytes();
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            public_key,
            public_key_fingerprint_hex: fingerprint(&public_key),
            unix_timestamp,
        }
    }

    /// Canonical payload bytes. Field order is part of the wire format and
    /// must not change.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let canonical = CanonicalCard {
            display_name: &self.display_name,
            pub_key: B64.encode(self.public_key),
            pub_key_fingerprint: &self.public_key_fingerprint_hex,
            ts: self.unix_timestamp,
            user_id: &self.user_id,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }
}

/// Serialization view of a card; keys are declared in sorted order.
#[derive(Serialize)]
struct CanonicalCard<'a> {
    #[serde(rename = "displayName")]
    display_name: &'a str,
    #[serde(rename = "pubKey")]
    pub_key: String,
    #[serde(rename = "pubKeyFingerprint")]
    pub_key_fingerprint: &'a str,
    ts: i64,
    #[serde(rename = "userId")]
    user_id: &'a str,
}

/// Signed wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload_bytes: Vec<u8>,
    pub signature_bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "payloadB64")]
    payload_b64: String,
    #[serde(rename = "signatureB64")]
    signature_b64: String,
}

impl Envelope {
    /// Encode as `{"payloadB64": .., "signatureB64": ..}`.
    pub fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        let wire = WireEnvelope {
            payload_b64: B64.encode(&self.payload_bytes),
            signature_b64: B64.encode(&self.signature_bytes),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parse the wire form. Any structural or base64 problem is reported as
    /// `MalformedPayload`; the signature is not checked here.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::MalformedPayload(format!("envelope: {e}")))?;
        let payload_bytes = B64
            .decode(wire.payload_b64.as_bytes())
            .map_err(|e| DecodeError::MalformedPayload(format!("payloadB64: {e}")))?;
        let signature_bytes = B64
            .decode(wire.signature_b64.as_bytes())
            .map_err(|e| DecodeError::MalformedPayload(format!("signatureB64: {e}")))?;
        Ok(Self {
            payload_bytes,
            signature_bytes,
        })
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Serialize `card` canonically and sign the exact bytes with `keys`.
///
/// The signing key is not checked against `card.public_key`; a mismatched
/// pair produces an envelope that every receiver rejects.
pub fn encode(card: &CardPayload, keys: &SigningKeyPair) -> Result<Envelope, EncodeError> {
    let payload_bytes = card.canonical_bytes()?;
    let signature = keys.sign(&payload_bytes);
    Ok(Envelope {
        payload_bytes,
        signature_bytes: signature.to_vec(),
    })
}

/// Parse, validate and authenticate an incoming envelope.
pub fn decode(envelope: &Envelope) -> Result<CardPayload, DecodeError> {
    let value: Value = serde_json::from_slice(&envelope.payload_bytes)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::MalformedPayload("payload is not a JSON object".into()))?;

    let user_id = str_field(obj, "userId")?;
    let display_name = str_field(obj, "displayName")?;
    let pub_key_b64 = str_field(obj, "pubKey")?;
    let claimed_fingerprint = str_field(obj, "pubKeyFingerprint")?;
    let ts = obj
        .get("ts")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::MissingField("ts"))?;

    let key_bytes = B64
        .decode(pub_key_b64.as_bytes())
        .map_err(|_| DecodeError::InvalidPublicKey)?;
    let verifying_key =
        verifying_key_from_bytes(&key_bytes).map_err(|_| DecodeError::InvalidPublicKey)?;

    let derived_fingerprint = fingerprint(&key_bytes);
    if !constant_time_eq(derived_fingerprint.as_bytes(), claimed_fingerprint.as_bytes()) {
        return Err(DecodeError::FingerprintMismatch);
    }

    verify_signature(
        &verifying_key,
        &envelope.payload_bytes,
        &envelope.signature_bytes,
    )
    .map_err(|_| DecodeError::SignatureInvalid)?;

    Ok(CardPayload {
        user_id: user_id.to_owned(),
        display_name: display_name.to_owned(),
        public_key: verifying_key.to_bytes(),
        public_key_fingerprint_hex: derived_fingerprint,
        unix_timestamp: ts,
    })
}

fn str_field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, DecodeError> {
    obj.get(name)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_700_000_000;

    fn sample(keys: &SigningKeyPair) -> CardPayload {
        CardPayload::new("a1", "Ada", keys, TS)
    }

    /// Re-sign arbitrary payload bytes so tests can reach the field checks.
    fn signed(keys: &SigningKeyPair, payload: &[u8]) -> Envelope {
        Envelope {
            payload_bytes: payload.to_vec(),
            signature_bytes: keys.sign(payload).to_vec(),
        }
    }

    #[test]
    fn test_round_trip() {
        let keys = SigningKeyPair::generate();
        let card = sample(&keys);

        let env = encode(&card, &keys).unwrap();
        assert_eq!(decode(&env).unwrap(), card);
    }

    #[test]
    fn test_wire_round_trip() {
        let keys = SigningKeyPair::generate();
        let env = encode(&sample(&keys), &keys).unwrap();

        let wire = env.to_wire().unwrap();
        let parsed = Envelope::from_wire(&wire).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(decode(&parsed).unwrap(), sample(&keys));
    }

    #[test]
    fn test_canonical_form() {
        let keys = SigningKeyPair::generate();
        let card = sample(&keys);
        let text = String::from_utf8(card.canonical_bytes().unwrap()).unwrap();

        let expected = format!(
            r#"{{"displayName":"Ada","pubKey":"{}","pubKeyFingerprint":"{}","ts":1700000000,"userId":"a1"}}"#,
            B64.encode(keys.public_key_bytes()),
            keys.fingerprint()
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_canonical_form_is_stable() {
        let keys = SigningKeyPair::generate();
        let card = sample(&keys);
        assert_eq!(
            card.canonical_bytes().unwrap(),
            card.clone().canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_signed_by_different_key_is_rejected() {
        let embedded = SigningKeyPair::generate();
        let signer = SigningKeyPair::generate();

        let env = encode(&sample(&embedded), &signer).unwrap();
        assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
    }

    #[test]
    fn test_signature_bit_flip_is_rejected() {
        let keys = SigningKeyPair::generate();
        let mut env = encode(&sample(&keys), &keys).unwrap();
        env.signature_bytes[10] ^= 0x01;
        assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
    }

    #[test]
    fn test_payload_bit_flip_is_rejected() {
        let keys = SigningKeyPair::generate();
        let mut env = encode(&sample(&keys), &keys).unwrap();

        // Last digit of "ts": 1700000000 -> 1700000001, still well-formed.
        let text = String::from_utf8(env.payload_bytes.clone()).unwrap();
        let idx = text.find(r#","userId""#).unwrap() - 1;
        env.payload_bytes[idx] ^= 0x01;

        assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
    }

    #[test]
    fn test_truncated_signature_is_rejected() {
        let keys = SigningKeyPair::generate();
        let mut env = encode(&sample(&keys), &keys).unwrap();
        env.signature_bytes.truncate(32);
        assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
    }

    #[test]
    fn test_malformed_base64_payload() {
        let wire = br#"{"payloadB64":"%%%not base64%%%","signatureB64":"AAAA"}"#;
        assert!(matches!(
            Envelope::from_wire(wire),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_wire_missing_signature() {
        let wire = br#"{"payloadB64":"e30="}"#;
        assert!(matches!(
            Envelope::from_wire(wire),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_payload_not_json() {
        let keys = SigningKeyPair::generate();
        let env = signed(&keys, b"definitely not json");
        assert!(matches!(decode(&env), Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_payload_not_object() {
        let keys = SigningKeyPair::generate();
        let env = signed(&keys, b"[1,2,3]");
        assert!(matches!(decode(&env), Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_missing_field() {
        let keys = SigningKeyPair::generate();
        let payload = format!(
            r#"{{"displayName":"Ada","pubKey":"{}","pubKeyFingerprint":"{}","ts":1}}"#,
            B64.encode(keys.public_key_bytes()),
            keys.fingerprint()
        );
        let env = signed(&keys, payload.as_bytes());
        assert_eq!(decode(&env), Err(DecodeError::MissingField("userId")));
    }

    #[test]
    fn test_mistyped_timestamp() {
        let keys = SigningKeyPair::generate();
        let payload = format!(
            r#"{{"displayName":"Ada","pubKey":"{}","pubKeyFingerprint":"{}","ts":"1700000000","userId":"a1"}}"#,
            B64.encode(keys.public_key_bytes()),
            keys.fingerprint()
        );
        let env = signed(&keys, payload.as_bytes());
        assert_eq!(decode(&env), Err(DecodeError::MissingField("ts")));
    }

    #[test]
    fn test_invalid_public_key() {
        let keys = SigningKeyPair::generate();
        let short_key = [9u8; 16];
        let payload = format!(
            r#"{{"displayName":"Ada","pubKey":"{}","pubKeyFingerprint":"{}","ts":1,"userId":"a1"}}"#,
            B64.encode(short_key),
            fingerprint(&short_key)
        );
        let env = signed(&keys, payload.as_bytes());
        assert_eq!(decode(&env), Err(DecodeError::InvalidPublicKey));
    }

    #[test]
    fn test_public_key_not_base64() {
        let keys = SigningKeyPair::generate();
        let payload = br#"{"displayName":"Ada","pubKey":"***","pubKeyFingerprint":"00","ts":1,"userId":"a1"}"#;
        let env = signed(&keys, payload);
        assert_eq!(decode(&env), Err(DecodeError::InvalidPublicKey));
    }

    #[test]
    fn test_fingerprint_mismatch() {
        let keys = SigningKeyPair::generate();
        let mut card = sample(&keys);
        card.public_key_fingerprint_hex = fingerprint(b"someone else");

        let env = encode(&card, &keys).unwrap();
        let err = decode(&env).unwrap_err();
        assert_eq!(err, DecodeError::FingerprintMismatch);
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_error_classification() {
        assert!(DecodeError::SignatureInvalid.is_authentication_failure());
        assert!(!DecodeError::InvalidPublicKey.is_authentication_failure());
        assert!(!DecodeError::MissingField("ts").is_authentication_failure());
    }
}
