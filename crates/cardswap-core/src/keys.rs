//! Identity bootstrap.
//!
//! Loads the installation's local identifier and Ed25519 signing key from
//! the secure store, creating and persisting each one on first use. Runs
//! once, synchronously, from the process entry point; the results are then
//! passed explicitly to everything that needs them.

use std::sync::Arc;

use tracing::info;
use zeroize::Zeroizing;

use cardswap_crypto::SigningKeyPair;

use crate::errors::KeyStoreError;
use crate::store::SecureStore;
use crate::types::LocalIdentity;

/// Service name all identity entries live under.
pub const DEFAULT_SERVICE: &str = "app.cardswap.identity";

/// Account holding the UTF-8 local identifier.
pub const LOCAL_ID_ACCOUNT: &str = "local-user-id";

/// Account holding the 32-byte Ed25519 secret seed.
pub const SIGNING_KEY_ACCOUNT: &str = "signing-key";

pub struct IdentityKeyStore {
    store: Arc<dyn SecureStore>,
    service: String,
}

impl IdentityKeyStore {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self::with_service(store, DEFAULT_SERVICE)
    }

    pub fn with_service(store: Arc<dyn SecureStore>, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    /// Load the persisted identity, creating missing entries.
    ///
    /// Each entry is handled on its own: an existing identifier is kept even
    /// if the key has to be generated, and vice versa.
    pub fn load_or_create(&self) -> Result<(LocalIdentity, SigningKeyPair), KeyStoreError> {
        let identity = self.load_or_create_id()?;
        let keys = self.load_or_create_key()?;
        info!(
            local_id = %identity,
            fingerprint = %keys.fingerprint(),
            "identity ready"
        );
        Ok((identity, keys))
    }

    fn load_or_create_id(&self) -> Result<LocalIdentity, KeyStoreError> {
        match self.store.load(LOCAL_ID_ACCOUNT, &self.service)? {
            Some(raw) => {
                let text = String::from_utf8(raw).map_err(|_| KeyStoreError::Corrupt {
                    account: LOCAL_ID_ACCOUNT,
                    reason: "not valid UTF-8".into(),
                })?;
                LocalIdentity::parse(&text).map_err(|e| KeyStoreError::Corrupt {
                    account: LOCAL_ID_ACCOUNT,
                    reason: e.to_string(),
                })
            }
            None => {
                let identity = LocalIdentity::generate();
                self.store
                    .save(identity.id.as_bytes(), LOCAL_ID_ACCOUNT, &self.service)?;
                info!(local_id = %identity, "created local identifier");
                Ok(identity)
            }
        }
    }

    fn load_or_create_key(&self) -> Result<SigningKeyPair, KeyStoreError> {
        match self.store.load(SIGNING_KEY_ACCOUNT, &self.service)? {
            Some(raw) => {
                let seed = Zeroizing::new(raw);
                SigningKeyPair::from_seed_bytes(&seed).map_err(|e| KeyStoreError::Corrupt {
                    account: SIGNING_KEY_ACCOUNT,
                    reason: e.to_string(),
                })
            }
            None => {
                let keys = SigningKeyPair::generate();
                self.store.save(
                    keys.to_seed_bytes().as_slice(),
                    SIGNING_KEY_ACCOUNT,
                    &self.service,
                )?;
                info!(fingerprint = %keys.fingerprint(), "created signing key");
                Ok(keys)
            }
        }
    }
}
