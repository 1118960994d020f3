//! Append-only, most-recent-first log of verified encounters.
//!
//! The ledger is a cheaply cloneable handle over one lock-guarded deque; the
//! lock is the single writer, so appends from concurrent peer sessions never
//! interleave or get lost. Entries are never removed, merged or mutated.
//!
//! Observers get a snapshot API (`all`, `latest`) plus an explicit
//! notification channel (`subscribe`). A lagging subscriber misses
//! notifications, never ledger entries.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::record::ConnectionRecord;

/// Default capacity of the append notification channel.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ConnectionLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    records: RwLock<VecDeque<ConnectionRecord>>,
    notify: broadcast::Sender<ConnectionRecord>,
}

impl ConnectionLedger {
    pub fn new() -> Self {
        Self::with_notify_capacity(DEFAULT_NOTIFY_CAPACITY)
    }

    pub fn with_notify_capacity(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(LedgerInner {
                records: RwLock::new(VecDeque::new()),
                notify,
            }),
        }
    }

    /// Insert at the head.
    pub fn append(&self, record: ConnectionRecord) {
        let mut records = self.inner.records.write();
        debug!(
            connection_id = %record.connection_id,
            peer = %record.peer_user_id,
            "ledger append"
        );
        records.push_front(record.clone());
        // Sent under the lock so notification order matches ledger order.
        // An error only means nobody is listening.
        let _ = self.inner.notify.send(record);
    }

    /// Snapshot, most recent first.
    pub fn all(&self) -> Vec<ConnectionRecord> {
        self.inner.records.read().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ConnectionRecord> {
        self.inner.records.read().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Receive every record appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionRecord> {
        self.inner.notify.subscribe()
    }
}

impl Default for ConnectionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLedger")
            .field("len", &self.len())
            .finish()
    }
}
