use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Public-key fingerprint: lowercase hex(sha256(raw_key_bytes)).
///
/// Every side (sender, verifier, record writer) must go through this one
/// function, otherwise fingerprints computed on different devices disagree.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    sha256_hex(public_key_bytes)
}
