//! Connection-id derivation.
//!
//! connection_id = hex(sha256(min(a, b) || "|" || max(a, b) || "|" || ts))
//!
//! The pair is sorted before hashing, so both ends of an encounter derive the
//! same id regardless of which side is "local". When `a == b` (loopback
//! pairing) the input is simply `a|a|ts`.

use crate::hash::sha256_hex;

/// Separator between id components. Part of the derivation; must not change.
pub const SEPARATOR: char = '|';

/// Canonical hash input for a connection id.
pub fn connection_id_input(a: &str, b: &str, unix_timestamp: i64) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{first}{SEPARATOR}{second}{SEPARATOR}{unix_timestamp}")
}

/// Deterministic, order-independent encounter id.
pub fn connection_id(a: &str, b: &str, unix_timestamp: i64) -> String {
    sha256_hex(connection_id_input(a, b, unix_timestamp).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_scenario() {
        assert_eq!(
            connection_id("a1", "b2", 1_700_000_000),
            sha256_hex(b"a1|b2|1700000000")
        );
    }

    #[test]
    fn test_order_independent() {
        assert_eq!(
            connection_id("b2", "a1", 1_700_000_000),
            connection_id("a1", "b2", 1_700_000_000)
        );
    }

    #[test]
    fn test_self_pairing_is_deterministic() {
        assert_eq!(connection_id_input("a1", "a1", 5), "a1|a1|5");
        assert_eq!(connection_id("a1", "a1", 5), connection_id("a1", "a1", 5));
    }

    #[test]
    fn test_timestamp_changes_id() {
        assert_ne!(connection_id("a1", "b2", 1), connection_id("a1", "b2", 2));
    }

    #[test]
    fn test_sort_is_bytewise() {
        // Uppercase sorts before lowercase in byte order.
        assert_eq!(connection_id_input("b", "B", 0), "B|b|0");
    }
}
