//! Test harness for cardswap core.
//!
//! Spins up orchestrators on a [`LoopbackNetwork`] and provides helpers to
//! wait on their exchange events. Used by the integration tests and the demo.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Offset, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cardswap_crypto::SigningKeyPair;
use cardswap_transport::{LoopbackNetwork, LoopbackTransport, PeerHandle, TransportError};

use crate::config::ExchangeConfig;
use crate::exchange::{ExchangeContext, ExchangeEvent, ExchangeOrchestrator};
use crate::ledger::ConnectionLedger;
use crate::record::{ConnectionRecord, RecordFactory};
use crate::types::LocalIdentity;

/// How long helpers wait for an event before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("event stream closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected outcome: {0}")]
    Unexpected(String),
}

/// One simulated device: an orchestrator running on a loopback endpoint.
pub struct TestPeer {
    pub handle: PeerHandle,
    pub identity: LocalIdentity,
    pub fingerprint: String,
    pub orchestrator: ExchangeOrchestrator,
    pub transport: Arc<LoopbackTransport>,
    /// Subscribed before the run loop started, so nothing is missed
    pub events: broadcast::Receiver<ExchangeEvent>,
    task: JoinHandle<()>,
}

impl TestPeer {
    pub fn ledger(&self) -> &ConnectionLedger {
        self.orchestrator.ledger()
    }

    /// Wait for the next event matching `pred`.
    pub async fn wait_for<F>(&mut self, what: &str, pred: F) -> Result<ExchangeEvent, HarnessError>
    where
        F: FnMut(&ExchangeEvent) -> bool,
    {
        wait_for(&mut self.events, what, DEFAULT_WAIT, pred).await
    }

    /// Wait for this peer to record an exchange.
    pub async fn wait_recorded(&mut self) -> Result<ConnectionRecord, HarnessError> {
        match self
            .wait_for("recorded", |e| matches!(e, ExchangeEvent::Recorded { .. }))
            .await?
        {
            ExchangeEvent::Recorded { record, .. } => Ok(record),
            other => Err(HarnessError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Shut the orchestrator down and wait for its run loop to end.
    pub async fn stop(self) {
        self.orchestrator.shutdown();
        let _ = self.task.await;
    }
}

/// Register `name` on `net` and start an orchestrator for it.
///
/// Must be called from within a tokio runtime.
pub fn spawn_peer(net: &LoopbackNetwork, name: &str, config: ExchangeConfig) -> TestPeer {
    spawn_peer_with_keys(net, name, config, LocalIdentity::generate(), SigningKeyPair::generate())
}

pub fn spawn_peer_with_keys(
    net: &LoopbackNetwork,
    name: &str,
    config: ExchangeConfig,
    identity: LocalIdentity,
    keys: SigningKeyPair,
) -> TestPeer {
    let (transport, transport_events) = net.endpoint(name);
    let transport = Arc::new(transport);
    let fingerprint = keys.fingerprint();

    let ctx = ExchangeContext::new(
        identity.clone(),
        Arc::new(keys),
        transport.clone(),
        ConnectionLedger::new(),
    )
    .with_config(config)
    .with_record_factory(RecordFactory::with_fixed_offset(Utc.fix()));

    let orchestrator = ExchangeOrchestrator::new(ctx);
    let events = orchestrator.subscribe();
    let runner = orchestrator.clone();
    let task = tokio::spawn(async move { runner.run(transport_events).await });

    TestPeer {
        handle: PeerHandle::new(name),
        identity,
        fingerprint,
        orchestrator,
        transport,
        events,
        task,
    }
}

/// Wait for the next event matching `pred`, skipping the rest.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<ExchangeEvent>,
    what: &str,
    limit: Duration,
    mut pred: F,
) -> Result<ExchangeEvent, HarnessError>
where
    F: FnMut(&ExchangeEvent) -> bool,
{
    let search = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(HarnessError::Closed),
            }
        }
    };
    tokio::time::timeout(limit, search)
        .await
        .map_err(|_| HarnessError::Timeout(what.to_string()))?
}

/// Discover, connect and wait until both sides recorded the exchange.
pub async fn run_loopback_exchange(
    net: &LoopbackNetwork,
    a: &mut TestPeer,
    b: &mut TestPeer,
) -> Result<(ConnectionRecord, ConnectionRecord), HarnessError> {
    net.discover(&a.handle, &b.handle)?;
    net.connect(&a.handle, &b.handle)?;

    let rec_a = a.wait_recorded().await?;
    let rec_b = b.wait_recorded().await?;

    if rec_a.connection_id != rec_b.connection_id {
        return Err(HarnessError::Unexpected(format!(
            "connection ids differ: {} vs {}",
            rec_a.connection_id, rec_b.connection_id
        )));
    }
    Ok((rec_a, rec_b))
}
