//! Leader election: a fencing lock with TTL heartbeat in the shared
//! database.
//!
//! Followers poll for takeover; the leader refreshes its lease well inside
//! the TTL. A heartbeat that matches zero rows means the lease is gone and
//! the replica demotes immediately. Transport errors leave the lease state
//! unknown: the replica stays leader until it either refreshes or the TTL
//! has provably elapsed since the last confirmed heartbeat, at which point
//! another replica can have won and we must demote.

use arx_api::store::LeaseStore;
use arx_types::cluster::ReplicaRole;
use arx_types::config::HighAvailabilityConfig;
use arx_types::error::ElectionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Election timing. `heartbeat_interval` must stay below half the TTL;
/// config validation enforces it.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub lock_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl From<&HighAvailabilityConfig> for ElectionConfig {
    fn from(cfg: &HighAvailabilityConfig) -> Self {
        Self {
            lock_ttl: Duration::from_secs(cfg.lock_ttl_seconds),
            heartbeat_interval: Duration::from_millis(cfg.heartbeat_interval_ms),
            poll_interval: Duration::from_millis(cfg.election_polling_interval_ms),
        }
    }
}

/// Drives the lease and broadcasts the replica's role.
pub struct LeadershipCoordinator {
    lease: Arc<dyn LeaseStore>,
    holder_id: String,
    config: ElectionConfig,
    role_tx: watch::Sender<ReplicaRole>,
}

impl LeadershipCoordinator {
    pub fn new(
        lease: Arc<dyn LeaseStore>,
        holder_id: String,
        config: ElectionConfig,
    ) -> (Self, watch::Receiver<ReplicaRole>) {
        let (role_tx, role_rx) = watch::channel(ReplicaRole::Follower);
        (
            Self {
                lease,
                holder_id,
                config,
                role_tx,
            },
            role_rx,
        )
    }

    /// Runs until `shutdown` flips. Releases the lease on the way out when
    /// leading.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ElectionError> {
        let mut role = ReplicaRole::Follower;
        let mut last_confirmed = Instant::now();

        loop {
            match role {
                ReplicaRole::Follower => match self.lease
                    .try_acquire(&self.holder_id, self.config.lock_ttl)
                    .await
                {
                    Ok(true) => {
                        tracing::info!(
                            target: "leadership",
                            holder = %self.holder_id,
                            "acquired leadership lease"
                        );
                        role = ReplicaRole::Leader;
                        last_confirmed = Instant::now();
                        let _ = self.role_tx.send(ReplicaRole::Leader);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(target: "leadership", error = %e, "lease poll failed");
                    }
                },
                ReplicaRole::Leader => match self.lease
                    .heartbeat(&self.holder_id, self.config.lock_ttl)
                    .await
                {
                    Ok(true) => {
                        last_confirmed = Instant::now();
                    }
                    Ok(false) => {
                        tracing::warn!(
                            target: "leadership",
                            holder = %self.holder_id,
                            "leadership lease lost"
                        );
                        role = ReplicaRole::Follower;
                        let _ = self.role_tx.send(ReplicaRole::Follower);
                    }
                    Err(e) => {
                        tracing::error!(target: "leadership", error = %e, "heartbeat failed");
                        if last_confirmed.elapsed() >= self.config.lock_ttl {
                            tracing::warn!(
                                target: "leadership",
                                "ttl elapsed without a confirmed heartbeat, demoting"
                            );
                            role = ReplicaRole::Follower;
                            let _ = self.role_tx.send(ReplicaRole::Follower);
                        }
                    }
                },
            }

            let wait = match role {
                ReplicaRole::Leader => self.config.heartbeat_interval,
                ReplicaRole::Follower => self.config.poll_interval,
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }

        if role.is_leader() {
            if let Err(e) = self.lease.release(&self.holder_id).await {
                tracing::warn!(target: "leadership", error = %e, "lease release failed");
            }
            let _ = self.role_tx.send(ReplicaRole::Follower);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_test_utils::InMemoryBackend;

    fn fast_config() -> ElectionConfig {
        ElectionConfig {
            lock_ttl: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
        }
    }

    async fn wait_for_role(
        rx: &mut watch::Receiver<ReplicaRole>,
        want: ReplicaRole,
    ) -> ReplicaRole {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *rx.borrow() == want {
                    return want;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("role transition timed out")
    }

    #[tokio::test]
    async fn single_replica_becomes_leader() {
        let backend = Arc::new(InMemoryBackend::new());
        let (coord, mut role_rx) =
            LeadershipCoordinator::new(backend.clone(), "a".into(), fast_config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coord.run(shutdown_rx));

        wait_for_role(&mut role_rx, ReplicaRole::Leader).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        // Lease released on shutdown.
        assert!(backend.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_replica_stays_follower_until_lease_expires() {
        let backend = Arc::new(InMemoryBackend::new());
        let (a, mut role_a) = LeadershipCoordinator::new(backend.clone(), "a".into(), fast_config());
        let (shutdown_a_tx, shutdown_a_rx) = watch::channel(false);
        let a_handle = tokio::spawn(a.run(shutdown_a_rx));
        wait_for_role(&mut role_a, ReplicaRole::Leader).await;

        let (b, mut role_b) = LeadershipCoordinator::new(backend.clone(), "b".into(), fast_config());
        let (_shutdown_b_tx, shutdown_b_rx) = watch::channel(false);
        let b_handle = tokio::spawn(b.run(shutdown_b_rx));

        // While a heartbeats, b cannot win.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*role_b.borrow(), ReplicaRole::Follower);
        assert_eq!(
            backend.current().await.unwrap().unwrap().holder_id,
            "a".to_string()
        );

        // Kill a without releasing (simulates a crash: abort, not shutdown).
        a_handle.abort();
        let _ = a_handle.await;

        // b wins within ttl + poll.
        wait_for_role(&mut role_b, ReplicaRole::Leader).await;
        assert_eq!(
            backend.current().await.unwrap().unwrap().holder_id,
            "b".to_string()
        );
        b_handle.abort();
    }
}
