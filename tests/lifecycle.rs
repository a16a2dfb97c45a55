//! Integration tests for the scenarios in `SPEC_FULL.md` §8, driven through
//! `NetworkManager` directly (each `ConnId` plus its registered `Outbox`
//! receiver stands in for a real WebSocket client, the same granularity
//! `imbolc-net`'s `tests/` harness drives a real `NetServer` at).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use ed25519_dalek::Keypair;
use rand::rngs::OsRng;

use meshd::codec::{
    ClientRequest, ComputerNetworkEntry, ConnectNetworkRequest, ConnId, CreateNetworkRequest,
    DisconnectNetworkRequest, JoinNetworkRequest, OutboundEnvelope, ServerMessage,
};
use meshd::config::Config;
use meshd::network::NetworkManager;
use meshd::outbox::{Outbox, OutboxItem};
use meshd::rate_limit::RateLimiter;
use meshd::session::SessionRegistry;
use meshd::stats::Stats;
use meshd::store::{InMemoryStore, RecordStore};

fn local_addr() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

/// Unwrap a queued outbound item into the envelope it carries, panicking on a
/// stray `Close` (none of these scenarios kick anyone).
fn expect_envelope(item: OutboxItem) -> OutboundEnvelope {
    match item {
        OutboxItem::Envelope(e) => e,
        OutboxItem::Close => panic!("expected an envelope, got a close directive"),
    }
}

fn keypair() -> (Keypair, String) {
    let mut csprng = OsRng {};
    let kp = Keypair::generate(&mut csprng);
    let encoded = STANDARD.encode(kp.public.to_bytes());
    (kp, encoded)
}

struct Harness {
    manager: Arc<NetworkManager>,
}

impl Harness {
    fn new() -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let manager = NetworkManager::new(
            store,
            Arc::new(SessionRegistry::new()),
            Arc::new(Outbox::new()),
            Arc::new(RateLimiter::new()),
            Arc::new(Stats::new()),
            Arc::new(Config::parse_from(["meshd"])),
        );
        Self { manager: Arc::new(manager) }
    }

    /// Register a connection's outbox and return its receiver, simulating a
    /// fresh transport-connect (spec §4.5.10 is the inverse of this).
    fn connect(&self, conn: ConnId) -> tokio::sync::mpsc::UnboundedReceiver<OutboxItem> {
        self.manager.outbox().register(conn)
    }

    async fn send(&self, conn: ConnId, request: ClientRequest) -> meshd::codec::OutboundEnvelope {
        self.manager
            .dispatch(conn, local_addr(), "mid".to_string(), request)
            .await
    }
}

#[tokio::test]
async fn create_flow_populates_store_and_replies_network_created() {
    let h = Harness::new();
    let (_kp, owner_key) = keypair();
    let _rx = h.connect(ConnId(1));

    let reply = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;

    let network_id = match reply.body {
        ServerMessage::NetworkCreated {
            network_id,
            network_name,
            pin,
            public_key,
        } => {
            assert_eq!(network_name, "alpha");
            assert_eq!(pin, "1234");
            assert_eq!(public_key, owner_key);
            network_id
        }
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let stored = h
        .manager
        .store()
        .get_network_by_id(&meshd::codec::NetworkId(network_id.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.owner_public_key, owner_key);

    let membership = h
        .manager
        .store()
        .get_membership(&meshd::codec::NetworkId(network_id), &owner_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.name, "Owner");
    assert!(membership.is_connected);
}

#[tokio::test]
async fn join_fans_out_computer_joined_both_directions() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let (_member_kp, member_key) = keypair();

    let mut owner_rx = h.connect(ConnId(1));
    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let mut member_rx = h.connect(ConnId(2));
    let joined = h
        .send(
            ConnId(2),
            ClientRequest::JoinNetwork(JoinNetworkRequest {
                public_key: member_key.clone(),
                network_id: network_id.clone(),
                pin: "1234".into(),
                computer_name: "Bob".into(),
            }),
        )
        .await;
    match joined.body {
        ServerMessage::NetworkJoined { network_id: nid, network_name } => {
            assert_eq!(nid, network_id);
            assert_eq!(network_name, "alpha");
        }
        other => panic!("expected NetworkJoined, got {other:?}"),
    }

    // Bob's bootstrap view: one ComputerJoined for the pre-existing owner.
    let bootstrap = expect_envelope(
        tokio::time::timeout(Duration::from_secs(1), member_rx.recv())
            .await
            .unwrap()
            .unwrap(),
    );
    match bootstrap.body {
        ServerMessage::ComputerJoined { public_key, computer_name, .. } => {
            assert_eq!(public_key, owner_key);
            assert_eq!(computer_name, "Owner");
        }
        other => panic!("expected ComputerJoined, got {other:?}"),
    }

    // The owner hears about Bob joining.
    let notice = expect_envelope(
        tokio::time::timeout(Duration::from_secs(1), owner_rx.recv())
            .await
            .unwrap()
            .unwrap(),
    );
    match notice.body {
        ServerMessage::ComputerJoined { public_key, computer_name, .. } => {
            assert_eq!(public_key, member_key);
            assert_eq!(computer_name, "Bob");
        }
        other => panic!("expected ComputerJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_pin_is_rejected_without_state_change() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let (_carol_kp, carol_key) = keypair();
    let _owner_rx = h.connect(ConnId(1));
    let _carol_rx = h.connect(ConnId(2));

    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key,
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let reply = h
        .send(
            ConnId(2),
            ClientRequest::JoinNetwork(JoinNetworkRequest {
                public_key: carol_key.clone(),
                network_id: network_id.clone(),
                pin: "9999".into(),
                computer_name: "Carol".into(),
            }),
        )
        .await;
    match reply.body {
        ServerMessage::Error { error, .. } => assert_eq!(error, "Incorrect password"),
        other => panic!("expected Error, got {other:?}"),
    }

    assert!(h
        .manager
        .store()
        .get_membership(&meshd::codec::NetworkId(network_id), &carol_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn owner_transport_disconnect_preserves_network_and_notifies_peers() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let (_member_kp, member_key) = keypair();
    let _owner_rx = h.connect(ConnId(1));

    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let mut member_rx = h.connect(ConnId(2));
    h.send(
        ConnId(2),
        ClientRequest::JoinNetwork(JoinNetworkRequest {
            public_key: member_key,
            network_id: network_id.clone(),
            pin: "1234".into(),
            computer_name: "Bob".into(),
        }),
    )
    .await;
    // Drain Bob's bootstrap ComputerJoined for the owner.
    let _ = member_rx.recv().await;

    h.manager.handle_transport_disconnect(ConnId(1)).await;

    let notice = expect_envelope(
        tokio::time::timeout(Duration::from_secs(1), member_rx.recv())
            .await
            .unwrap()
            .unwrap(),
    );
    match notice.body {
        ServerMessage::ComputerLeft { public_key, .. } => assert_eq!(public_key, owner_key),
        other => panic!("expected ComputerLeft, got {other:?}"),
    }

    let network = h
        .manager
        .store()
        .get_network_by_id(&meshd::codec::NetworkId(network_id.clone()))
        .await
        .unwrap();
    assert!(network.is_some(), "owner disconnect must not delete the network");

    let membership = h
        .manager
        .store()
        .get_membership(&meshd::codec::NetworkId(network_id), &owner_key)
        .await
        .unwrap()
        .unwrap();
    assert!(!membership.is_connected);
}

#[tokio::test]
async fn second_network_for_same_owner_key_is_conflict() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let _rx1 = h.connect(ConnId(1));
    let _rx2 = h.connect(ConnId(2));

    let first = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match first.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let second = h
        .send(
            ConnId(2),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key,
                network_name: "beta".into(),
                pin: "2222".into(),
            }),
        )
        .await;
    match second.body {
        ServerMessage::Error { error, .. } => {
            assert_eq!(error, format!("This public key has already created network: {network_id}"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn get_computer_networks_lists_every_membership() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let _rx = h.connect(ConnId(1));

    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let reply = h
        .send(
            ConnId(1),
            ClientRequest::GetComputerNetworks(meshd::codec::GetComputerNetworksRequest {
                public_key: owner_key,
            }),
        )
        .await;
    match reply.body {
        ServerMessage::ComputerNetworks { networks } => {
            assert_eq!(networks.len(), 1);
            let entry: &ComputerNetworkEntry = &networks[0];
            assert_eq!(entry.network_id, network_id);
            assert!(entry.is_connected);
        }
        other => panic!("expected ComputerNetworks, got {other:?}"),
    }
}

#[tokio::test]
async fn kick_sends_kicked_then_closes_the_targets_transport() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let (_member_kp, member_key) = keypair();
    let _owner_rx = h.connect(ConnId(1));

    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let mut member_rx = h.connect(ConnId(2));
    h.send(
        ConnId(2),
        ClientRequest::JoinNetwork(JoinNetworkRequest {
            public_key: member_key.clone(),
            network_id: network_id.clone(),
            pin: "1234".into(),
            computer_name: "Bob".into(),
        }),
    )
    .await;
    // Drain Bob's bootstrap ComputerJoined for the owner.
    let _ = member_rx.recv().await;

    let reply = h
        .send(
            ConnId(1),
            ClientRequest::Kick(meshd::codec::KickRequest {
                public_key: owner_key,
                network_id: network_id.clone(),
                target_id: member_key,
                signature: None,
            }),
        )
        .await;
    match reply.body {
        ServerMessage::KickSuccess { network_id: nid, .. } => assert_eq!(nid, network_id),
        other => panic!("expected KickSuccess, got {other:?}"),
    }

    match member_rx.recv().await.unwrap() {
        OutboxItem::Envelope(e) => assert!(matches!(e.body, ServerMessage::Kicked { .. })),
        OutboxItem::Close => panic!("expected Kicked before Close"),
    }
    assert!(matches!(member_rx.recv().await.unwrap(), OutboxItem::Close));
}

#[tokio::test]
async fn ping_echoes_client_timestamp_with_ok_status() {
    let h = Harness::new();
    let (_kp, key) = keypair();
    let _rx = h.connect(ConnId(1));

    let reply = h
        .send(
            ConnId(1),
            ClientRequest::Ping(meshd::codec::PingRequest {
                public_key: key,
                timestamp: 42,
            }),
        )
        .await;
    match reply.body {
        ServerMessage::Ping { client_timestamp, status, .. } => {
            assert_eq!(client_timestamp, 42);
            assert_eq!(status, "ok");
        }
        other => panic!("expected Ping, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_after_disconnect_restores_is_connected_and_fans_out_names() {
    let h = Harness::new();
    let (_owner_kp, owner_key) = keypair();
    let (_member_kp, member_key) = keypair();
    let mut owner_rx = h.connect(ConnId(1));

    let created = h
        .send(
            ConnId(1),
            ClientRequest::CreateNetwork(CreateNetworkRequest {
                public_key: owner_key.clone(),
                network_name: "alpha".into(),
                pin: "1234".into(),
            }),
        )
        .await;
    let network_id = match created.body {
        ServerMessage::NetworkCreated { network_id, .. } => network_id,
        other => panic!("expected NetworkCreated, got {other:?}"),
    };

    let mut member_rx = h.connect(ConnId(2));
    h.send(
        ConnId(2),
        ClientRequest::JoinNetwork(JoinNetworkRequest {
            public_key: member_key.clone(),
            network_id: network_id.clone(),
            pin: "1234".into(),
            computer_name: "Bob".into(),
        }),
    )
    .await;
    // Drain Bob's bootstrap ComputerJoined and the owner's ComputerJoined notice.
    let _ = member_rx.recv().await;
    let _ = owner_rx.recv().await;

    h.send(
        ConnId(2),
        ClientRequest::DisconnectNetwork(DisconnectNetworkRequest {
            public_key: member_key.clone(),
            network_id: network_id.clone(),
        }),
    )
    .await;
    // Drain the owner's ComputerDisconnected notice.
    let _ = owner_rx.recv().await;

    let reconnected = h
        .send(
            ConnId(2),
            ClientRequest::ConnectNetwork(ConnectNetworkRequest {
                public_key: member_key.clone(),
                network_id: network_id.clone(),
                computer_name: "Bob".into(),
            }),
        )
        .await;
    match reconnected.body {
        ServerMessage::NetworkConnected { network_id: nid, network_name } => {
            assert_eq!(nid, network_id);
            assert_eq!(network_name, "alpha");
        }
        other => panic!("expected NetworkConnected, got {other:?}"),
    }

    // Bob is reciprocally told about the owner under the owner's membership name.
    let reciprocal = expect_envelope(
        tokio::time::timeout(Duration::from_secs(1), member_rx.recv())
            .await
            .unwrap()
            .unwrap(),
    );
    match reciprocal.body {
        ServerMessage::ComputerConnected { public_key, computer_name, .. } => {
            assert_eq!(public_key, owner_key);
            assert_eq!(computer_name, "Owner");
        }
        other => panic!("expected ComputerConnected, got {other:?}"),
    }

    // The owner hears about Bob reconnecting, with Bob's computer_name.
    let notice = expect_envelope(
        tokio::time::timeout(Duration::from_secs(1), owner_rx.recv())
            .await
            .unwrap()
            .unwrap(),
    );
    match notice.body {
        ServerMessage::ComputerConnected { public_key, computer_name, .. } => {
            assert_eq!(public_key, member_key);
            assert_eq!(computer_name, "Bob");
        }
        other => panic!("expected ComputerConnected, got {other:?}"),
    }

    let membership = h
        .manager
        .store()
        .get_membership(&meshd::codec::NetworkId(network_id), &member_key)
        .await
        .unwrap()
        .unwrap();
    assert!(membership.is_connected);
}

#[tokio::test]
async fn unknown_message_type_reply_carries_the_message_id() {
    let text = r#"{"message_id":"corr-1","type":"Bogus","payload":{}}"#;
    let err = meshd::codec::decode(text).unwrap_err();
    assert_eq!(err.message_id.as_deref(), Some("corr-1"));

    let envelope = meshd::codec::OutboundEnvelope::error(err.message_id.unwrap(), &err.error);
    assert_eq!(envelope.message_id, "corr-1");
}
