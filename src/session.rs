//! Session Registry (spec §4.4): the single exclusive lock protecting the
//! three ephemeral maps `conn -> network_id`, `conn -> public_key`, and
//! `network_id -> {conn}`.
//!
//! Modeled as three independent maps keyed by opaque handles (spec §9 "Cyclic
//! references") rather than back-pointers from a network aggregate to
//! connection objects. Handlers acquire [`SessionRegistry::lock`]'s guard,
//! compute a plan, and release it before doing any transport I/O — see
//! `network.rs` for the call sites.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::codec::{ConnId, NetworkId};

#[derive(Default)]
struct RegistryInner {
    conn_network: HashMap<ConnId, NetworkId>,
    conn_pubkey: HashMap<ConnId, String>,
    network_members: HashMap<NetworkId, HashSet<ConnId>>,
}

/// Process-wide session state, guarded by a single exclusive lock.
///
/// Intentionally not a static/global (spec §9 "Global mutable state") so that
/// tests can instantiate isolated registries.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) the public key claimed by a connection.
    pub async fn set_identity(&self, conn: ConnId, public_key: String) {
        let mut guard = self.inner.lock().await;
        guard.conn_pubkey.insert(conn, public_key);
    }

    pub async fn identity_of(&self, conn: ConnId) -> Option<String> {
        let guard = self.inner.lock().await;
        guard.conn_pubkey.get(&conn).cloned()
    }

    pub async fn network_of(&self, conn: ConnId) -> Option<NetworkId> {
        let guard = self.inner.lock().await;
        guard.conn_network.get(&conn).cloned()
    }

    /// Attach a connection to a network under the given identity.
    pub async fn attach(&self, conn: ConnId, network: NetworkId, public_key: String) {
        let mut guard = self.inner.lock().await;
        guard.conn_pubkey.insert(conn, public_key);
        guard
            .network_members
            .entry(network.clone())
            .or_default()
            .insert(conn);
        guard.conn_network.insert(conn, network);
    }

    /// Detach a connection from whatever network it is attached to, if any.
    /// The public key mapping is left intact — a detached member is still a
    /// member, just not currently attached (spec §3 Membership invariants).
    pub async fn detach(&self, conn: ConnId) -> Option<NetworkId> {
        let mut guard = self.inner.lock().await;
        let network = guard.conn_network.remove(&conn)?;
        if let Some(members) = guard.network_members.get_mut(&network) {
            members.remove(&conn);
            if members.is_empty() {
                guard.network_members.remove(&network);
            }
        }
        Some(network)
    }

    /// Remove a connection entirely (transport-disconnect): detaches it and
    /// forgets its identity, returning `(network, public_key)` if it had both.
    pub async fn remove_connection(&self, conn: ConnId) -> (Option<NetworkId>, Option<String>) {
        let mut guard = self.inner.lock().await;
        let network = guard.conn_network.remove(&conn);
        if let Some(net) = &network {
            if let Some(members) = guard.network_members.get_mut(net) {
                members.remove(&conn);
                if members.is_empty() {
                    guard.network_members.remove(net);
                }
            }
        }
        let public_key = guard.conn_pubkey.remove(&conn);
        (network, public_key)
    }

    /// Snapshot of every connection currently attached to `network`, excluding `exclude`.
    pub async fn peers_of(&self, network: &NetworkId, exclude: ConnId) -> Vec<ConnId> {
        let guard = self.inner.lock().await;
        guard
            .network_members
            .get(network)
            .map(|members| members.iter().copied().filter(|c| *c != exclude).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every connection attached to `network`, self included.
    pub async fn all_members(&self, network: &NetworkId) -> Vec<ConnId> {
        let guard = self.inner.lock().await;
        guard
            .network_members
            .get(network)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, network: &NetworkId) -> usize {
        let guard = self.inner.lock().await;
        guard.network_members.get(network).map(HashSet::len).unwrap_or(0)
    }

    pub async fn is_attached(&self, conn: ConnId, network: &NetworkId) -> bool {
        let guard = self.inner.lock().await;
        guard
            .network_members
            .get(network)
            .is_some_and(|m| m.contains(&conn))
    }

    /// Find the connection id attached to `network` under `public_key`, if any.
    pub async fn find_in_network(&self, network: &NetworkId, public_key: &str) -> Option<ConnId> {
        let guard = self.inner.lock().await;
        let members = guard.network_members.get(network)?;
        members
            .iter()
            .copied()
            .find(|c| guard.conn_pubkey.get(c).map(String::as_str) == Some(public_key))
    }

    /// Evict every connection attached to `network` (owner Leave cascade);
    /// returns the evicted connections so the caller can close their transports.
    pub async fn evict_network(&self, network: &NetworkId) -> Vec<ConnId> {
        let mut guard = self.inner.lock().await;
        let members = guard.network_members.remove(network).unwrap_or_default();
        for conn in &members {
            guard.conn_network.remove(conn);
        }
        members.into_iter().collect()
    }

    /// Snapshot of every network id with at least one attached connection.
    pub async fn all_networks(&self) -> Vec<NetworkId> {
        let guard = self.inner.lock().await;
        guard.network_members.keys().cloned().collect()
    }

    pub async fn active_connection_count(&self) -> usize {
        let guard = self.inner.lock().await;
        guard.conn_network.len()
    }

    pub async fn active_network_count(&self) -> usize {
        let guard = self.inner.lock().await;
        guard.network_members.len()
    }
}
