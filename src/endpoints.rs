//! External Endpoints (spec §6, §4.10): the WebSocket transport upgrade,
//! the health probe, and the stats snapshot route.
//!
//! Grounded on `ChainSafe-Delorean-Protocol`'s `fendermint/eth/api` WS
//! handler (`handlers/ws.rs`) for the split-socket read/write select loop
//! and on its `lib.rs` for axum router assembly + CORS layering. Each
//! connection gets its own reader (this task) and its own outbound channel
//! (`crate::outbox::Outbox`), so a broadcast to N peers never blocks on one
//! slow socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::codec::{self, ConnId, OutboundEnvelope};
use crate::identity;
use crate::network::NetworkManager;
use crate::outbox::OutboxItem;
use crate::stats::StatsSnapshot;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<NetworkManager>,
    next_conn_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(manager: Arc<NetworkManager>) -> Self {
        Self {
            manager,
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_conn(&self) -> ConnId {
        ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Assemble the three routes named in spec §6: `/ws`, `/health`, `/stats`.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.manager.config().allow_all_origins {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(cors)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatsResponse {
    server_stats: StatsSnapshot,
    config: ConfigSnapshot,
}

#[derive(Serialize)]
struct ConfigSnapshot {
    max_clients_per_network: usize,
    network_expiry_days: i64,
    cleanup_interval: u64,
    allow_all_origins: bool,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let cfg = state.manager.config();
    Json(StatsResponse {
        server_stats: state.manager.stats().snapshot(),
        config: ConfigSnapshot {
            max_clients_per_network: cfg.max_clients_per_network,
            network_expiry_days: cfg.network_expiry_days,
            cleanup_interval: cfg.cleanup_interval_hours,
            allow_all_origins: cfg.allow_all_origins,
        },
    })
}

/// `GET /ws`: upgrade to a WebSocket and hand the connection to [`handle_socket`].
///
/// An `X-Client-ID` header carrying a recognized (well-formed) public key
/// causes an immediate `ComputerNetworks` push, per spec §6.
async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let client_id = headers
        .get("X-Client-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(state, socket, addr, client_id))
}

async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    addr: SocketAddr,
    client_id: Option<String>,
) {
    let manager = state.manager.clone();
    let conn = state.next_conn();
    manager.stats().record_connection_opened();

    let mut rx = manager.outbox().register(conn);
    let (mut sink, mut stream) = socket.split();

    if let Some(public_key) = client_id.filter(|k| identity::validate_public_key(k).is_ok()) {
        if let Ok(body) = manager.computer_networks_snapshot(&public_key).await {
            manager
                .outbox()
                .send(conn, OutboundEnvelope::new("", body));
        }
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let envelope = match codec::decode(&text) {
                            Ok((message_id, request)) => {
                                manager.dispatch(conn, addr.ip(), message_id, request).await
                            }
                            Err(failure) => OutboundEnvelope::error(
                                failure.message_id.unwrap_or_default(),
                                &failure.error,
                            ),
                        };
                        manager.outbox().send(conn, envelope);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(OutboxItem::Envelope(envelope)) => {
                        if sink.send(Message::Text(envelope.to_text())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboxItem::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    manager.handle_transport_disconnect(conn).await;
    manager.stats().record_connection_closed();
}
