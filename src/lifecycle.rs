//! Lifecycle supervisor: the periodic scan that expires tunnels whose
//! lifetime has elapsed (spec §4.6).

use crate::metering::MeteringEngine;
use crate::registry::TunnelRegistry;
use crate::wireguard::PeerController;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SCAN_TICK: Duration = Duration::from_secs(10);

/// Scans the registry for tunnels past their `expires_at` and retires
/// them: registry transition, final accrual, kernel peer removal. The
/// registry transition happens first and atomically (under its own lock),
/// so a concurrent GET or DELETE on the same tunnel id always observes
/// either the fully-active or fully-expired record, never a partial state
/// (spec §4.6, §5).
pub struct LifecycleSupervisor {
    registry: Arc<TunnelRegistry>,
    metering: Arc<MeteringEngine>,
    peer_controller: Arc<PeerController>,
}

impl LifecycleSupervisor {
    pub fn new(
        registry: Arc<TunnelRegistry>,
        metering: Arc<MeteringEngine>,
        peer_controller: Arc<PeerController>,
    ) -> Self {
        Self {
            registry,
            metering,
            peer_controller,
        }
    }

    /// One scan pass: expire every active tunnel past its deadline.
    pub async fn run_scan(&self) {
        let now = Utc::now();
        let candidates: Vec<_> = self
            .registry
            .iterate_active()
            .into_iter()
            .filter(|t| t.expires_at < now)
            .collect();

        for tunnel in candidates {
            let Some(terminal) = self.registry.transition_to_expired(&tunnel.id) else {
                // another caller (a concurrent GET) already transitioned it
                continue;
            };

            self.metering.accrue_terminal(&terminal, tunnel.expires_at);

            if let Err(e) = self.peer_controller.remove_peer(&terminal.client_public_key).await {
                warn!("failed to remove kernel peer for expired tunnel {}: {e}", terminal.id);
            } else {
                info!("tunnel {} expired and kernel peer removed", terminal.id);
            }
        }
    }

    /// Spawn the 10-second scan task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SCAN_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_scan().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::fake::AlwaysAffordableKeeperClient;
    use crate::wireguard::PrivateKey;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn scan_expires_tunnels_past_deadline() {
        let registry = Arc::new(TunnelRegistry::new("10.100.0.0/24").unwrap());
        let keeper = Arc::new(AlwaysAffordableKeeperClient);
        let metering = Arc::new(MeteringEngine::new(registry.clone(), keeper, "us-east".into()));
        let peer_controller = Arc::new(PeerController::new("wg-test-nonexistent"));
        let supervisor = LifecycleSupervisor::new(registry.clone(), metering.clone(), peer_controller);

        let created = Utc::now() - ChronoDuration::seconds(120);
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + ChronoDuration::seconds(60),
                PrivateKey::generate(),
            )
            .unwrap();

        supervisor.run_scan().await;

        let stored = registry.get(&record.id).unwrap();
        assert_eq!(stored.status, crate::registry::TunnelStatus::Expired);
        assert_eq!(metering.pending_len(), 1);
    }

    #[tokio::test]
    async fn scan_leaves_unexpired_tunnels_active() {
        let registry = Arc::new(TunnelRegistry::new("10.100.0.0/24").unwrap());
        let keeper = Arc::new(AlwaysAffordableKeeperClient);
        let metering = Arc::new(MeteringEngine::new(registry.clone(), keeper, "us-east".into()));
        let peer_controller = Arc::new(PeerController::new("wg-test-nonexistent"));
        let supervisor = LifecycleSupervisor::new(registry.clone(), metering.clone(), peer_controller);

        let created = Utc::now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + ChronoDuration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        supervisor.run_scan().await;

        let stored = registry.get(&record.id).unwrap();
        assert_eq!(stored.status, crate::registry::TunnelStatus::Active);
    }
}
