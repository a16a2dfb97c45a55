//! Network Lifecycle Manager (spec §4.5): the nine request handlers, owner-only
//! authorization, and fan-out of peer notifications.
//!
//! Grounded on `mohsenil85-imbolc-workspace`'s `imbolc-net` session-management
//! crate for the overall shape (privileged-client checks, suspended-session
//! reconnection, per-client outbox) and on `ChainSafe-Delorean-Protocol`'s
//! `handlers/ws.rs` for the envelope-in/envelope-out dispatch loop. Every
//! handler follows the same discipline: read/mutate the Record Store, compute
//! a fan-out plan while holding the Session Registry lock just long enough to
//! snapshot recipients, then release it before writing to any transport.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::codec::{
    ClientRequest, ComputerNetworkEntry, ConnId, NetworkId, OutboundEnvelope, ServerMessage,
};
use crate::config::Config;
use crate::error::HandlerError;
use crate::identity;
use crate::outbox::Outbox;
use crate::rate_limit::RateLimiter;
use crate::session::SessionRegistry;
use crate::stats::Stats;
use crate::store::{Membership, Network, RecordStore};

const MAX_ID_RETRIES: u8 = 5;

pub struct NetworkManager {
    store: Arc<dyn RecordStore>,
    sessions: Arc<SessionRegistry>,
    outbox: Arc<Outbox>,
    rate_limiter: Arc<RateLimiter>,
    stats: Arc<Stats>,
    config: Arc<Config>,
    shutting_down: AtomicBool,
}

impl NetworkManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sessions: Arc<SessionRegistry>,
        outbox: Arc<Outbox>,
        rate_limiter: Arc<RateLimiter>,
        stats: Arc<Stats>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            sessions,
            outbox,
            rate_limiter,
            stats,
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Decode-to-reply pipeline for one already-decoded request. Never returns
    /// an `Err` — failures are folded into an `Error` envelope.
    pub async fn dispatch(
        &self,
        conn: ConnId,
        addr: IpAddr,
        message_id: String,
        request: ClientRequest,
    ) -> OutboundEnvelope {
        self.stats.record_message_processed();

        if self.is_shutting_down() && !matches!(request, ClientRequest::Ping(_)) {
            return OutboundEnvelope::error(message_id, &HandlerError::ShuttingDown);
        }

        let result = match &request {
            ClientRequest::CreateNetwork(_) | ClientRequest::JoinNetwork(_) => {
                if !self.rate_limiter.check(addr).await {
                    Err(HandlerError::RateLimited)
                } else {
                    self.handle(conn, request).await
                }
            }
            _ => self.handle(conn, request).await,
        };

        match result {
            Ok(body) => OutboundEnvelope::new(message_id, body),
            Err(err) => OutboundEnvelope::error(message_id, &err),
        }
    }

    async fn handle(&self, conn: ConnId, request: ClientRequest) -> Result<ServerMessage, HandlerError> {
        match request {
            ClientRequest::CreateNetwork(r) => self.create_network(conn, r.public_key, r.network_name, r.pin).await,
            ClientRequest::JoinNetwork(r) => {
                self.join_network(conn, r.public_key, NetworkId(r.network_id), r.pin, r.computer_name)
                    .await
            }
            ClientRequest::ConnectNetwork(r) => {
                self.connect_network(conn, r.public_key, NetworkId(r.network_id), r.computer_name)
                    .await
            }
            ClientRequest::DisconnectNetwork(r) => {
                self.disconnect_network(conn, r.public_key, NetworkId(r.network_id)).await
            }
            ClientRequest::LeaveNetwork(r) => {
                self.leave_network(conn, r.public_key, NetworkId(r.network_id), r.signature)
                    .await
            }
            ClientRequest::Kick(r) => {
                self.kick(conn, r.public_key, NetworkId(r.network_id), r.target_id, r.signature)
                    .await
            }
            ClientRequest::Rename(r) => {
                self.rename(r.public_key, NetworkId(r.network_id), r.network_name, r.signature)
                    .await
            }
            ClientRequest::Ping(r) => Ok(ServerMessage::Ping {
                client_timestamp: r.timestamp,
                server_timestamp: Utc::now().timestamp_millis(),
                status: "ok".to_string(),
            }),
            ClientRequest::GetComputerNetworks(r) => self.get_computer_networks(&r.public_key).await,
        }
    }

    /// Owner-privileged operations authorize by public-key equality, and,
    /// when `REQUIRE_SIGNATURES` is set, additionally require a valid Ed25519
    /// signature over `message` from that same key (spec §4.2, §9).
    fn authorize_owner(
        &self,
        network: &Network,
        caller_public_key: &str,
        signature: Option<&str>,
        message: &[u8],
    ) -> Result<(), HandlerError> {
        if network.owner_public_key != caller_public_key {
            return Err(HandlerError::Auth("Only the network owner may do this".to_string()));
        }
        if self.config.require_signatures {
            let key = identity::parse_public_key(caller_public_key)?;
            let sig = signature.ok_or_else(|| {
                HandlerError::Auth("Signature required for this operation".to_string())
            })?;
            identity::verify_signature(&key, message, sig)?;
        }
        Ok(())
    }

    async fn create_network(
        &self,
        conn: ConnId,
        public_key: String,
        network_name: String,
        pin: String,
    ) -> Result<ServerMessage, HandlerError> {
        if public_key.is_empty() || network_name.is_empty() {
            return Err(HandlerError::Validation("public_key and network_name are required".into()));
        }
        identity::validate_public_key(&public_key)?;
        identity::validate_pin(&pin)?;

        if let Some(existing) = self.store.get_network_by_owner_key(&public_key).await? {
            return Err(HandlerError::Conflict(format!(
                "This public key has already created network: {}",
                existing.network_id
            )));
        }

        let mut network_id = crate::codec::generate_network_id();
        for _ in 0..MAX_ID_RETRIES {
            if self.store.get_network_by_id(&network_id).await?.is_none() {
                break;
            }
            network_id = crate::codec::generate_network_id();
        }

        let now = Utc::now();
        let network = Network {
            network_id: network_id.0.clone(),
            name: network_name.clone(),
            pin: pin.clone(),
            owner_public_key: public_key.clone(),
            created_at: now,
            last_active: now,
        };
        self.store.create_network(network).await?;
        self.store
            .add_membership(Membership {
                network_id: network_id.0.clone(),
                public_key: public_key.clone(),
                name: "Owner".to_string(),
                joined_at: now,
                last_connected: now,
                is_connected: true,
            })
            .await?;

        self.sessions.attach(conn, network_id.clone(), public_key.clone()).await;
        self.stats
            .set_active_networks(self.sessions.active_network_count().await as u64);
        info!(network_id = %network_id, "network created");

        Ok(ServerMessage::NetworkCreated {
            network_id: network_id.0,
            network_name,
            pin,
            public_key,
        })
    }

    async fn join_network(
        &self,
        conn: ConnId,
        public_key: String,
        network_id: NetworkId,
        pin: String,
        computer_name: String,
    ) -> Result<ServerMessage, HandlerError> {
        identity::validate_public_key(&public_key)?;

        let network = self
            .store
            .get_network_by_id(&network_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound("No such network".to_string()))?;

        if network.pin != pin {
            return Err(HandlerError::Auth("Incorrect password".to_string()));
        }

        if self.sessions.member_count(&network_id).await >= self.config.max_clients_per_network {
            return Err(HandlerError::Capacity("Network is full".to_string()));
        }

        let now = Utc::now();
        self.store
            .add_membership(Membership {
                network_id: network_id.0.clone(),
                public_key: public_key.clone(),
                name: computer_name.clone(),
                joined_at: now,
                last_connected: now,
                is_connected: true,
            })
            .await?;
        self.store.update_network_activity(&network_id, now).await?;

        let existing_peers = self.sessions.peers_of(&network_id, conn).await;
        self.sessions.attach(conn, network_id.clone(), public_key.clone()).await;
        self.stats
            .set_active_networks(self.sessions.active_network_count().await as u64);

        self.outbox.send_to_many(
            existing_peers.iter().copied(),
            OutboundEnvelope::new(
                "",
                ServerMessage::ComputerJoined {
                    network_id: network_id.0.clone(),
                    public_key: public_key.clone(),
                    computer_name: computer_name.clone(),
                },
            ),
        );
        for peer in existing_peers {
            if let Some(peer_key) = self.sessions.identity_of(peer).await {
                let peer_name = self
                    .store
                    .get_membership(&network_id, &peer_key)
                    .await?
                    .map(|m| m.name)
                    .unwrap_or_default();
                self.outbox.send(
                    conn,
                    OutboundEnvelope::new(
                        "",
                        ServerMessage::ComputerJoined {
                            network_id: network_id.0.clone(),
                            public_key: peer_key,
                            computer_name: peer_name,
                        },
                    ),
                );
            }
        }

        Ok(ServerMessage::NetworkJoined {
            network_id: network_id.0,
            network_name: network.name,
        })
    }

    async fn connect_network(
        &self,
        conn: ConnId,
        public_key: String,
        network_id: NetworkId,
        computer_name: String,
    ) -> Result<ServerMessage, HandlerError> {
        identity::validate_public_key(&public_key)?;

        let network = self
            .store
            .get_network_by_id(&network_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound("No such network".to_string()))?;

        self.store
            .get_membership(&network_id, &public_key)
            .await?
            .ok_or_else(|| HandlerError::Auth("You must join this network first".to_string()))?;

        if self.sessions.member_count(&network_id).await >= self.config.max_clients_per_network {
            return Err(HandlerError::Capacity("Network is full".to_string()));
        }

        let now = Utc::now();
        self.store
            .update_membership_connected(&network_id, &public_key, true, Some(now))
            .await?;
        self.store.update_network_activity(&network_id, now).await?;

        let existing_peers = self.sessions.peers_of(&network_id, conn).await;
        self.sessions.attach(conn, network_id.clone(), public_key.clone()).await;

        self.outbox.send_to_many(
            existing_peers.iter().copied(),
            OutboundEnvelope::new(
                "",
                ServerMessage::ComputerConnected {
                    network_id: network_id.0.clone(),
                    public_key: public_key.clone(),
                    computer_name: computer_name.clone(),
                },
            ),
        );
        for peer in existing_peers {
            if let Some(peer_key) = self.sessions.identity_of(peer).await {
                let peer_name = self
                    .store
                    .get_membership(&network_id, &peer_key)
                    .await?
                    .map(|m| m.name)
                    .unwrap_or_default();
                self.outbox.send(
                    conn,
                    OutboundEnvelope::new(
                        "",
                        ServerMessage::ComputerConnected {
                            network_id: network_id.0.clone(),
                            public_key: peer_key,
                            computer_name: peer_name,
                        },
                    ),
                );
            }
        }

        Ok(ServerMessage::NetworkConnected {
            network_id: network_id.0,
            network_name: network.name,
        })
    }

    async fn disconnect_network(
        &self,
        conn: ConnId,
        public_key: String,
        network_id: NetworkId,
    ) -> Result<ServerMessage, HandlerError> {
        self.sessions.detach(conn).await;
        self.store
            .update_membership_connected(&network_id, &public_key, false, None)
            .await?;

        if let Some(network) = self.store.get_network_by_id(&network_id).await? {
            if network.owner_public_key == public_key {
                self.store.update_network_activity(&network_id, Utc::now()).await?;
            }
        }

        let peers = self.sessions.peers_of(&network_id, conn).await;
        self.outbox.send_to_many(
            peers,
            OutboundEnvelope::new(
                "",
                ServerMessage::ComputerDisconnected {
                    network_id: network_id.0.clone(),
                    public_key,
                },
            ),
        );

        Ok(ServerMessage::NetworkDisconnected {
            network_id: network_id.0,
        })
    }

    async fn leave_network(
        &self,
        conn: ConnId,
        public_key: String,
        network_id: NetworkId,
        signature: Option<String>,
    ) -> Result<ServerMessage, HandlerError> {
        let network = self
            .store
            .get_network_by_id(&network_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound("No such network".to_string()))?;

        if network.owner_public_key == public_key {
            let message = format!("leave:{}:{}", network_id, public_key);
            self.authorize_owner(&network, &public_key, signature.as_deref(), message.as_bytes())?;

            let peers = self.sessions.peers_of(&network_id, conn).await;
            self.outbox.send_to_many(
                peers,
                OutboundEnvelope::new(
                    "",
                    ServerMessage::NetworkDeleted {
                        network_id: network_id.0.clone(),
                    },
                ),
            );
            self.sessions.evict_network(&network_id).await;
            self.store.delete_network(&network_id).await?;
            self.stats
                .set_active_networks(self.sessions.active_network_count().await as u64);

            // `NetworkDeleted` above is the peer-facing broadcast; the owner who
            // requested the deletion gets the distinct `DeleteSuccess` reply
            // (mirrors Kick's Kicked-to-target / KickSuccess-to-caller split).
            Ok(ServerMessage::DeleteSuccess {
                network_id: network_id.0,
            })
        } else {
            self.sessions.detach(conn).await;
            self.store.delete_membership(&network_id, &public_key).await?;

            let peers = self.sessions.peers_of(&network_id, conn).await;
            self.outbox.send_to_many(
                peers,
                OutboundEnvelope::new(
                    "",
                    ServerMessage::ComputerLeft {
                        network_id: network_id.0.clone(),
                        public_key,
                    },
                ),
            );

            Ok(ServerMessage::NetworkDisconnected {
                network_id: network_id.0,
            })
        }
    }

    async fn kick(
        &self,
        conn: ConnId,
        public_key: String,
        network_id: NetworkId,
        target_id: String,
        signature: Option<String>,
    ) -> Result<ServerMessage, HandlerError> {
        let network = self
            .store
            .get_network_by_id(&network_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound("No such network".to_string()))?;

        let message = format!("kick:{}:{}", network_id, target_id);
        self.authorize_owner(&network, &public_key, signature.as_deref(), message.as_bytes())?;

        let target_conn = self
            .sessions
            .find_in_network(&network_id, &target_id)
            .await
            .ok_or_else(|| HandlerError::NotFound("Target is not attached to this network".to_string()))?;

        self.outbox.send(
            target_conn,
            OutboundEnvelope::new(
                "",
                ServerMessage::Kicked {
                    network_id: network_id.0.clone(),
                },
            ),
        );
        self.outbox.close(target_conn);
        self.sessions.detach(target_conn).await;
        self.store
            .update_membership_connected(&network_id, &target_id, false, None)
            .await?;
        let _ = conn;

        Ok(ServerMessage::KickSuccess {
            network_id: network_id.0,
            target_id,
        })
    }

    async fn rename(
        &self,
        public_key: String,
        network_id: NetworkId,
        network_name: String,
        signature: Option<String>,
    ) -> Result<ServerMessage, HandlerError> {
        if network_name.is_empty() || network_name.len() > 64 {
            return Err(HandlerError::Validation(
                "network_name must be 1-64 characters".to_string(),
            ));
        }

        let network = self
            .store
            .get_network_by_id(&network_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound("No such network".to_string()))?;

        let message = format!("rename:{}:{}", network_id, network_name);
        self.authorize_owner(&network, &public_key, signature.as_deref(), message.as_bytes())?;

        self.store
            .update_network_name(&network_id, &network_name, Utc::now())
            .await?;

        let members = self.sessions.all_members(&network_id).await;
        self.outbox.send_to_many(
            members,
            OutboundEnvelope::new(
                "",
                ServerMessage::NetworkRenamed {
                    network_id: network_id.0.clone(),
                    network_name: network_name.clone(),
                },
            ),
        );

        Ok(ServerMessage::RenameSuccess {
            network_id: network_id.0,
            network_name,
        })
    }

    /// Public wrapper used by the transport layer to bootstrap a connection's
    /// view right after upgrade (spec §6 "X-Client-ID").
    pub async fn computer_networks_snapshot(
        &self,
        public_key: &str,
    ) -> Result<ServerMessage, HandlerError> {
        self.get_computer_networks(public_key).await
    }

    async fn get_computer_networks(&self, public_key: &str) -> Result<ServerMessage, HandlerError> {
        let memberships = self.store.list_memberships_for_key(public_key).await?;
        let mut networks = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let Some(network) = self
                .store
                .get_network_by_id(&NetworkId(membership.network_id.clone()))
                .await?
            else {
                continue;
            };
            networks.push(ComputerNetworkEntry {
                network_id: network.network_id,
                network_name: network.name,
                is_connected: membership.is_connected,
                joined_at: membership.joined_at,
                last_connected: membership.last_connected,
            });
        }
        Ok(ServerMessage::ComputerNetworks { networks })
    }

    /// Involuntary transport-disconnect handling (spec §4.5.10).
    pub async fn handle_transport_disconnect(&self, conn: ConnId) {
        let (network, public_key) = self.sessions.remove_connection(conn).await;
        let (Some(network_id), Some(public_key)) = (network, public_key) else {
            return;
        };

        if let Err(e) = self
            .store
            .update_membership_connected(&network_id, &public_key, false, None)
            .await
        {
            warn!(%network_id, error = %e, "failed to mark membership disconnected");
        }

        if let Ok(Some(network)) = self.store.get_network_by_id(&network_id).await {
            if network.owner_public_key == public_key {
                let _ = self.store.update_network_activity(&network_id, Utc::now()).await;
            }
        }

        let peers = self.sessions.peers_of(&network_id, conn).await;
        self.outbox.send_to_many(
            peers,
            OutboundEnvelope::new(
                "",
                ServerMessage::ComputerLeft {
                    network_id: network_id.0,
                    public_key,
                },
            ),
        );
        self.outbox.unregister(conn);
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}
