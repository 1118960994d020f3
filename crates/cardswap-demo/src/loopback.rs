//! Loopback exchange between the local identity and simulated peers.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use cardswap_core::harness::{spawn_peer, spawn_peer_with_keys, wait_for};
use cardswap_core::{ConnectionRecord, ExchangeConfig, ExchangeEvent, LocalIdentity};
use cardswap_crypto::{encode, CardPayload, SigningKeyPair};
use cardswap_transport::{LoopbackNetwork, PeerHandle, PeerTransport};

/// What to simulate.
#[derive(Debug, Clone)]
pub struct LoopbackPlan {
    /// Number of honest peers
    pub peers: usize,
    /// Add a peer that sends a card signed with the wrong key
    pub forged: bool,
    /// How long to wait for every handshake to finish
    pub wait: Duration,
}

impl Default for LoopbackPlan {
    fn default() -> Self {
        Self {
            peers: 2,
            forged: false,
            wait: Duration::from_secs(10),
        }
    }
}

/// Outcome of one demo run.
#[derive(Debug)]
pub struct LoopbackReport {
    /// Local ledger, most recent first
    pub ledger: Vec<ConnectionRecord>,
    pub rejected: usize,
    pub unanswered: usize,
}

/// Connect the local device to every simulated peer and wait until each
/// handshake has an outcome.
pub async fn run_loopback(
    config: &ExchangeConfig,
    identity: LocalIdentity,
    keys: SigningKeyPair,
    plan: &LoopbackPlan,
) -> anyhow::Result<LoopbackReport> {
    let net = LoopbackNetwork::new();
    let mut local = spawn_peer_with_keys(&net, "local", config.clone(), identity, keys);

    let mut peers = Vec::with_capacity(plan.peers);
    for i in 0..plan.peers {
        let peer_config = ExchangeConfig {
            display_name: format!("Simulated peer {i}"),
            ..config.clone()
        };
        let peer = spawn_peer(&net, &format!("peer-{i}"), peer_config);
        net.discover(&local.handle, &peer.handle)?;
        net.connect(&local.handle, &peer.handle)?;
        peers.push(peer);
    }

    // Held until the run ends so the forger's link stays up.
    let _forger = if plan.forged {
        let (forger, forger_rx) = net.endpoint("forger");
        net.connect(&local.handle, forger.local())?;

        let claimed = CardPayload::new(
            "impersonated-user",
            "Someone Else",
            &SigningKeyPair::generate(),
            Utc::now().timestamp(),
        );
        let forged = encode(&claimed, &SigningKeyPair::generate())?.to_wire()?;
        forger
            .send(&forged, &[local.handle.clone()])
            .await
            .context("forger send")?;
        Some((forger, forger_rx))
    } else {
        None
    };

    let expected = plan.peers + usize::from(plan.forged);
    let mut finished: HashSet<PeerHandle> = HashSet::new();
    let mut rejected = 0;
    let mut unanswered = 0;

    while finished.len() < expected {
        let event = wait_for(&mut local.events, "exchange outcome", plan.wait, |e| {
            matches!(
                e,
                ExchangeEvent::Recorded { .. }
                    | ExchangeEvent::Rejected { .. }
                    | ExchangeEvent::NoCardReceived { .. }
            )
        })
        .await?;

        match &event {
            ExchangeEvent::Recorded { peer, record } => info!(
                peer = %peer,
                peer_display_name = %record.peer_display_name,
                connection_id = %record.connection_id,
                "exchange recorded"
            ),
            ExchangeEvent::Rejected { peer, error } => {
                warn!(peer = %peer, error = %error, "exchange rejected");
                rejected += 1;
            }
            ExchangeEvent::NoCardReceived { peer, reason } => {
                warn!(peer = %peer, ?reason, "no card received");
                unanswered += 1;
            }
            _ => {}
        }
        finished.insert(event.peer().clone());
    }

    let ledger = local.ledger().all();
    local.stop().await;
    for peer in peers {
        peer.stop().await;
    }

    Ok(LoopbackReport {
        ledger,
        rejected,
        unanswered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_honest_peers_are_recorded() {
        let identity = LocalIdentity::generate();
        let plan = LoopbackPlan {
            peers: 3,
            ..LoopbackPlan::default()
        };

        let report = run_loopback(
            &ExchangeConfig::default(),
            identity.clone(),
            SigningKeyPair::generate(),
            &plan,
        )
        .await
        .unwrap();

        assert_eq!(report.ledger.len(), 3);
        assert_eq!(report.rejected, 0);
        assert!(report.ledger.iter().all(|r| r.local_user_id == identity.id));
        assert!(report.ledger.iter().all(|r| r.method == "loopback"));
    }

    #[tokio::test]
    async fn test_forged_peer_is_rejected() {
        let plan = LoopbackPlan {
            peers: 1,
            forged: true,
            ..LoopbackPlan::default()
        };

        let report = run_loopback(
            &ExchangeConfig::default(),
            LocalIdentity::generate(),
            SigningKeyPair::generate(),
            &plan,
        )
        .await
        .unwrap();

        assert_eq!(report.ledger.len(), 1);
        assert_eq!(report.rejected, 1);
        assert!(report
            .ledger
            .iter()
            .all(|r| r.peer_user_id != "impersonated-user"));
    }
}
