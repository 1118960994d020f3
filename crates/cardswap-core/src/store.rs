//! Secure storage seam for identity material.
//!
//! The platform keychain (or equivalent) is an external collaborator. The
//! core only needs two synchronous operations, keyed by `(account, service)`,
//! and calls them exactly twice at startup. `InMemorySecureStore` backs tests
//! and the demo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during secure store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("secure store unreadable: {0}")]
    Unreadable(String),

    #[error("secure store write failed: {0}")]
    WriteFailed(String),
}

// ============================================================================
// Store Trait
// ============================================================================

/// Keychain-style key/value store.
pub trait SecureStore: Send + Sync {
    /// Save (or overwrite) `bytes` under `(account, service)`.
    fn save(&self, bytes: &[u8], account: &str, service: &str) -> Result<(), StoreError>;

    /// Load the value under `(account, service)`.
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` if present
    /// * `Ok(None)` if no entry exists
    /// * `Err(StoreError)` if the store cannot be read
    fn load(&self, account: &str, service: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// In-memory secure store.
///
/// Failure injection (`set_unreadable`) lets tests exercise the fatal
/// bootstrap path.
#[derive(Debug, Default)]
pub struct InMemorySecureStore {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
    unreadable: AtomicBool,
    saves: AtomicUsize,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following load and save fail.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::Relaxed);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SecureStore for InMemorySecureStore {
    fn save(&self, bytes: &[u8], account: &str, service: &str) -> Result<(), StoreError> {
        if self.unreadable.load(Ordering::Relaxed) {
            return Err(StoreError::WriteFailed("store locked".into()));
        }
        self.entries
            .write()
            .insert((service.to_string(), account.to_string()), bytes.to_vec());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, account: &str, service: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.unreadable.load(Ordering::Relaxed) {
            return Err(StoreError::Unreadable("store locked".into()));
        }
        Ok(self
            .entries
            .read()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }
}
