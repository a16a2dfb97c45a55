//! Shutdown Coordinator (spec §4.8): broadcasts a shutdown notice, persists
//! last-active timestamps so surviving networks aren't mistaken for stale by
//! the Reaper, and signals dependent tasks to stop within a deadline.
//!
//! Idempotent: a second trigger observes the flag already set and returns
//! immediately, matching the `is_shutdown` latch in spec §4.8.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::info;

use crate::codec::{NetworkId, OutboundEnvelope, ServerMessage};
use crate::network::NetworkManager;
use crate::outbox::Outbox;
use crate::session::SessionRegistry;
use crate::store::RecordStore;

const GRACE_PERIOD: Duration = Duration::from_millis(200);
const FANOUT_WINDOW: Duration = Duration::from_millis(200);

pub struct ShutdownCoordinator {
    sessions: Arc<SessionRegistry>,
    outbox: Arc<Outbox>,
    store: Arc<dyn RecordStore>,
    manager: Arc<NetworkManager>,
    deadline: Duration,
    tx: watch::Sender<bool>,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        outbox: Arc<Outbox>,
        store: Arc<dyn RecordStore>,
        manager: Arc<NetworkManager>,
        deadline: Duration,
    ) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                sessions,
                outbox,
                store,
                manager,
                deadline,
                tx,
                triggered: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Run the full shutdown sequence. Safe to call more than once; only the
    /// first call does anything.
    pub async fn trigger(&self, reason: &str) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(reason, "shutdown triggered");
        self.manager.begin_shutdown();

        sleep(GRACE_PERIOD).await;

        let connections = self.outbox.all_connections();
        let notice = OutboundEnvelope::new(
            "",
            ServerMessage::ServerShutdown {
                message: "Server is shutting down".to_string(),
                shutdown_in_seconds: self.deadline.as_secs(),
                restart_info: "The server will be back shortly; reconnect and Connect to resume your networks.".to_string(),
            },
        );
        self.outbox.send_to_many(connections, notice);

        sleep(FANOUT_WINDOW).await;

        let now = Utc::now();
        for network_id in self.sessions.all_networks().await {
            if let Err(e) = self.store.update_network_activity(&network_id, now).await {
                tracing::warn!(%network_id, error = %e, "failed to refresh last_active during shutdown");
            }
        }

        let _ = self.tx.send(true);
    }

    pub async fn run_signal_listener(self: Arc<Self>) {
        if tokio::signal::ctrl_c().await.is_ok() {
            self.trigger("ctrl_c").await;
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rate_limit::RateLimiter;
    use crate::stats::Stats;
    use crate::store::{InMemoryStore, Network};
    use clap::Parser;

    #[tokio::test]
    async fn second_trigger_is_a_noop() {
        let sessions = Arc::new(SessionRegistry::new());
        let outbox = Arc::new(Outbox::new());
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let manager = Arc::new(NetworkManager::new(
            store.clone(),
            sessions.clone(),
            outbox.clone(),
            Arc::new(RateLimiter::new()),
            Arc::new(Stats::new()),
            Arc::new(Config::parse_from(["meshd"])),
        ));
        let (coordinator, mut rx) =
            ShutdownCoordinator::new(sessions, outbox, store, manager.clone(), Duration::from_secs(1));

        coordinator.trigger("first").await;
        assert!(manager.is_shutting_down());
        assert!(*rx.borrow_and_update());

        coordinator.trigger("second").await;
    }

    #[tokio::test]
    async fn refreshes_last_active_for_attached_networks() {
        let sessions = Arc::new(SessionRegistry::new());
        let outbox = Arc::new(Outbox::new());
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());

        let ancient = Utc::now() - chrono::Duration::days(30);
        store
            .create_network(Network {
                network_id: "aaaa1111".to_string(),
                name: "alpha".to_string(),
                pin: "1234".to_string(),
                owner_public_key: "owner".to_string(),
                created_at: ancient,
                last_active: ancient,
            })
            .await
            .unwrap();
        sessions
            .attach(crate::codec::ConnId(1), NetworkId("aaaa1111".into()), "owner".into())
            .await;

        let manager = Arc::new(NetworkManager::new(
            store.clone(),
            sessions.clone(),
            outbox.clone(),
            Arc::new(RateLimiter::new()),
            Arc::new(Stats::new()),
            Arc::new(Config::parse_from(["meshd"])),
        ));
        let (coordinator, _rx) =
            ShutdownCoordinator::new(sessions, outbox, store.clone(), manager, Duration::from_secs(1));

        coordinator.trigger("test").await;

        let network = store
            .get_network_by_id(&NetworkId("aaaa1111".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(network.last_active > ancient);
    }
}
