//! Stale-Network Reaper (spec §4.6): a periodic task deleting networks whose
//! `last_active` has aged past `network_expiry_days`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::codec::NetworkId;
use crate::stats::Stats;
use crate::store::RecordStore;

pub struct Reaper {
    store: Arc<dyn RecordStore>,
    stats: Arc<Stats>,
    expiry: chrono::Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn RecordStore>,
        stats: Arc<Stats>,
        expiry: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            stats,
            expiry,
            interval,
        }
    }

    /// Run the sweep loop until `shutdown` resolves. Intended to be spawned as
    /// its own task (spec §5 "The Reaper ... run on independent tasks").
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reaper stopping for shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep pass, exposed separately so tests can drive it without waiting on the ticker.
    pub async fn sweep_once(&self) -> u64 {
        let cutoff = Utc::now() - self.expiry;
        let stale = match self.store.list_stale_networks(cutoff).await {
            Ok(networks) => networks,
            Err(e) => {
                error!(error = %e, "failed to list stale networks");
                return 0;
            }
        };

        let mut removed = 0u64;
        for network in stale {
            let id = NetworkId(network.network_id.clone());
            match self.store.delete_network(&id).await {
                Ok(()) => {
                    removed += 1;
                    info!(network_id = %id, "reaped stale network");
                }
                Err(e) => {
                    error!(network_id = %id, error = %e, "failed to reap stale network");
                }
            }
        }

        self.stats.record_cleanup(removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Network};

    fn old_network(id: &str) -> Network {
        let ancient = Utc::now() - chrono::Duration::days(30);
        Network {
            network_id: id.to_string(),
            name: "old".to_string(),
            pin: "1234".to_string(),
            owner_public_key: format!("owner-{id}"),
            created_at: ancient,
            last_active: ancient,
        }
    }

    #[tokio::test]
    async fn sweep_removes_networks_past_expiry() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        store.create_network(old_network("aaaa1111")).await.unwrap();

        let stats = Arc::new(Stats::new());
        let reaper = Reaper::new(
            store.clone(),
            stats.clone(),
            chrono::Duration::days(7),
            Duration::from_secs(3600),
        );

        let removed = reaper.sweep_once().await;
        assert_eq!(removed, 1);
        assert!(store
            .get_network_by_id(&NetworkId("aaaa1111".into()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(stats.snapshot().stale_networks_removed, 1);
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_networks_alone() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .create_network(Network {
                network_id: "bbbb2222".to_string(),
                name: "fresh".to_string(),
                pin: "1234".to_string(),
                owner_public_key: "owner-b".to_string(),
                created_at: now,
                last_active: now,
            })
            .await
            .unwrap();

        let reaper = Reaper::new(
            store.clone(),
            Arc::new(Stats::new()),
            chrono::Duration::days(7),
            Duration::from_secs(3600),
        );

        let removed = reaper.sweep_once().await;
        assert_eq!(removed, 0);
        assert!(store
            .get_network_by_id(&NetworkId("bbbb2222".into()))
            .await
            .unwrap()
            .is_some());
    }
}
