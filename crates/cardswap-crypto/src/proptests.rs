#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::card::{decode, encode, CardPayload, DecodeError};
    use crate::connection::connection_id;
    use crate::hash::fingerprint;
    use crate::identity::SigningKeyPair;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_connection_id_symmetry(
            a in "[a-z0-9-]{1,36}",
            b in "[a-z0-9-]{1,36}",
            ts in any::<i64>(),
        ) {
            prop_assert_eq!(connection_id(&a, &b, ts), connection_id(&b, &a, ts));
        }

        #[test]
        fn test_card_round_trip(
            seed in any::<[u8; 32]>(),
            user_id in "[a-z0-9-]{1,36}",
            display_name in any::<String>(),
            ts in any::<i64>(),
        ) {
            let keys = SigningKeyPair::from_seed_bytes(&seed).unwrap();
            let card = CardPayload::new(user_id, display_name, &keys, ts);
            let env = encode(&card, &keys).unwrap();
            prop_assert_eq!(decode(&env), Ok(card));
        }

        #[test]
        fn test_signature_bit_flip_rejected(
            seed in any::<[u8; 32]>(),
            bit in 0usize..512,
        ) {
            let keys = SigningKeyPair::from_seed_bytes(&seed).unwrap();
            let card = CardPayload::new("a1", "Ada", &keys, 1_700_000_000);
            let mut env = encode(&card, &keys).unwrap();
            env.signature_bytes[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
        }

        #[test]
        fn test_display_name_bit_flip_rejected(
            seed in any::<[u8; 32]>(),
            name in "[a-zA-Z0-9]{1,16}",
            pos in any::<prop::sample::Index>(),
        ) {
            let keys = SigningKeyPair::from_seed_bytes(&seed).unwrap();
            let card = CardPayload::new("a1", name.clone(), &keys, 1_700_000_000);
            let mut env = encode(&card, &keys).unwrap();

            // Payload starts with {"displayName":" ; flipping the low bit of
            // an alphanumeric character keeps the JSON well-formed.
            let offset = r#"{"displayName":""#.len() + pos.index(name.len());
            env.payload_bytes[offset] ^= 0x01;
            prop_assert_eq!(decode(&env), Err(DecodeError::SignatureInvalid));
        }

        #[test]
        fn test_fingerprint_stable_across_reload(seed in any::<[u8; 32]>()) {
            let keys = SigningKeyPair::from_seed_bytes(&seed).unwrap();
            let reloaded = SigningKeyPair::from_seed_bytes(keys.to_seed_bytes().as_slice()).unwrap();
            prop_assert_eq!(keys.fingerprint(), reloaded.fingerprint());
            prop_assert_eq!(fingerprint(&keys.public_key_bytes()), keys.fingerprint());
        }
    }
}
