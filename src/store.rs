//! Record Store Adapter (spec §3, §6): typed CRUD over durable `Network` and
//! `Membership` records.
//!
//! The real backend lives outside this crate's scope; [`RecordStore`] is the
//! abstract contract, and [`InMemoryStore`] is the reference implementation
//! used whenever no external store endpoint is configured, and always in
//! tests. It is built on [`dashmap::DashMap`] the way the connection tables in
//! `maidsafe-temp_safe_network`'s `sn/src/types/connections` are: independent,
//! per-key-locking maps rather than one big mutex, since durable-record
//! access is not subject to the Session Registry's single-lock invariant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::codec::NetworkId;
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub network_id: String,
    pub name: String,
    pub pin: String,
    pub owner_public_key: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub network_id: String,
    pub public_key: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub last_connected: DateTime<Utc>,
    pub is_connected: bool,
}

fn membership_key(network_id: &str, public_key: &str) -> String {
    format!("{network_id}\u{0}{public_key}")
}

/// Abstract typed CRUD contract for durable Network/Membership records (spec §6).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_network(&self, network: Network) -> Result<(), StoreError>;
    async fn get_network_by_id(&self, id: &NetworkId) -> Result<Option<Network>, StoreError>;
    async fn get_network_by_owner_key(
        &self,
        owner_public_key: &str,
    ) -> Result<Option<Network>, StoreError>;
    async fn update_network_activity(
        &self,
        id: &NetworkId,
        last_active: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn update_network_name(
        &self,
        id: &NetworkId,
        name: &str,
        last_active: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn delete_network(&self, id: &NetworkId) -> Result<(), StoreError>;
    async fn list_stale_networks(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Network>, StoreError>;

    async fn add_membership(&self, membership: Membership) -> Result<(), StoreError>;
    async fn get_membership(
        &self,
        network_id: &NetworkId,
        public_key: &str,
    ) -> Result<Option<Membership>, StoreError>;
    async fn list_memberships_for_key(
        &self,
        public_key: &str,
    ) -> Result<Vec<Membership>, StoreError>;
    async fn list_memberships_for_network(
        &self,
        network_id: &NetworkId,
    ) -> Result<Vec<Membership>, StoreError>;
    async fn update_membership_connected(
        &self,
        network_id: &NetworkId,
        public_key: &str,
        is_connected: bool,
        last_connected: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    async fn delete_membership(
        &self,
        network_id: &NetworkId,
        public_key: &str,
    ) -> Result<(), StoreError>;

    /// Startup reconciliation (spec §3 "Startup reconciliation"): reset
    /// `is_connected=false` on every membership, since in-memory session state
    /// is necessarily empty when this runs.
    async fn reset_all_connected_flags(&self) -> Result<(), StoreError>;
}

/// In-memory reference implementation of [`RecordStore`].
#[derive(Default, Clone)]
pub struct InMemoryStore {
    networks: Arc<DashMap<String, Network>>,
    memberships: Arc<DashMap<String, Membership>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_network(&self, network: Network) -> Result<(), StoreError> {
        if self.networks.contains_key(&network.network_id) {
            return Err(StoreError::Conflict);
        }
        self.networks.insert(network.network_id.clone(), network);
        Ok(())
    }

    async fn get_network_by_id(&self, id: &NetworkId) -> Result<Option<Network>, StoreError> {
        Ok(self.networks.get(&id.0).map(|e| e.value().clone()))
    }

    async fn get_network_by_owner_key(
        &self,
        owner_public_key: &str,
    ) -> Result<Option<Network>, StoreError> {
        Ok(self
            .networks
            .iter()
            .find(|e| e.value().owner_public_key == owner_public_key)
            .map(|e| e.value().clone()))
    }

    async fn update_network_activity(
        &self,
        id: &NetworkId,
        last_active: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entry = self.networks.get_mut(&id.0).ok_or(StoreError::NotFound)?;
        entry.last_active = last_active;
        Ok(())
    }

    async fn update_network_name(
        &self,
        id: &NetworkId,
        name: &str,
        last_active: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entry = self.networks.get_mut(&id.0).ok_or(StoreError::NotFound)?;
        entry.name = name.to_string();
        entry.last_active = last_active;
        Ok(())
    }

    async fn delete_network(&self, id: &NetworkId) -> Result<(), StoreError> {
        self.networks.remove(&id.0).ok_or(StoreError::NotFound)?;
        self.memberships
            .retain(|_, m| m.network_id != id.0);
        Ok(())
    }

    async fn list_stale_networks(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Network>, StoreError> {
        Ok(self
            .networks
            .iter()
            .filter(|e| e.value().last_active < cutoff)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn add_membership(&self, membership: Membership) -> Result<(), StoreError> {
        let key = membership_key(&membership.network_id, &membership.public_key);
        self.memberships.insert(key, membership);
        Ok(())
    }

    async fn get_membership(
        &self,
        network_id: &NetworkId,
        public_key: &str,
    ) -> Result<Option<Membership>, StoreError> {
        let key = membership_key(&network_id.0, public_key);
        Ok(self.memberships.get(&key).map(|e| e.value().clone()))
    }

    async fn list_memberships_for_key(
        &self,
        public_key: &str,
    ) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .memberships
            .iter()
            .filter(|e| e.value().public_key == public_key)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_memberships_for_network(
        &self,
        network_id: &NetworkId,
    ) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .memberships
            .iter()
            .filter(|e| e.value().network_id == network_id.0)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_membership_connected(
        &self,
        network_id: &NetworkId,
        public_key: &str,
        is_connected: bool,
        last_connected: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let key = membership_key(&network_id.0, public_key);
        let mut entry = self.memberships.get_mut(&key).ok_or(StoreError::NotFound)?;
        entry.is_connected = is_connected;
        if let Some(ts) = last_connected {
            entry.last_connected = ts;
        }
        Ok(())
    }

    async fn delete_membership(
        &self,
        network_id: &NetworkId,
        public_key: &str,
    ) -> Result<(), StoreError> {
        let key = membership_key(&network_id.0, public_key);
        self.memberships.remove(&key).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn reset_all_connected_flags(&self) -> Result<(), StoreError> {
        for mut entry in self.memberships.iter_mut() {
            entry.is_connected = false;
        }
        Ok(())
    }
}
