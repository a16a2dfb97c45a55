//! Message envelope and dispatch (spec §4.1).
//!
//! Wire format: `{ "message_id": "...", "type": "...", "payload": { ... } }`,
//! carried as a WebSocket text frame. Decoding is staged in two passes so that
//! a `message_id` is recoverable even when the payload for a known `type`
//! fails to parse — see [`decode`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

/// A connection-scoped identifier, stable for the lifetime of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// An opaque, URL-safe network identifier (8 hex chars — see SPEC_FULL.md Design Notes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub String);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a fresh 8-hex-character network id.
pub fn generate_network_id() -> NetworkId {
    let bytes: [u8; 4] = rand::random();
    NetworkId(hex::encode(bytes))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNetworkRequest {
    pub public_key: String,
    pub network_name: String,
    pub pin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinNetworkRequest {
    pub public_key: String,
    pub network_id: String,
    pub pin: String,
    pub computer_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectNetworkRequest {
    pub public_key: String,
    pub network_id: String,
    pub computer_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisconnectNetworkRequest {
    pub public_key: String,
    pub network_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveNetworkRequest {
    pub public_key: String,
    pub network_id: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KickRequest {
    pub public_key: String,
    pub network_id: String,
    pub target_id: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    pub public_key: String,
    pub network_id: String,
    pub network_name: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingRequest {
    pub public_key: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetComputerNetworksRequest {
    pub public_key: String,
}

/// A decoded client request, tagged by its wire `type`.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    CreateNetwork(CreateNetworkRequest),
    JoinNetwork(JoinNetworkRequest),
    ConnectNetwork(ConnectNetworkRequest),
    DisconnectNetwork(DisconnectNetworkRequest),
    LeaveNetwork(LeaveNetworkRequest),
    Kick(KickRequest),
    Rename(RenameRequest),
    Ping(PingRequest),
    GetComputerNetworks(GetComputerNetworksRequest),
}

impl ClientRequest {
    /// The caller's claimed public key, present on every request variant.
    pub fn public_key(&self) -> &str {
        match self {
            ClientRequest::CreateNetwork(r) => &r.public_key,
            ClientRequest::JoinNetwork(r) => &r.public_key,
            ClientRequest::ConnectNetwork(r) => &r.public_key,
            ClientRequest::DisconnectNetwork(r) => &r.public_key,
            ClientRequest::LeaveNetwork(r) => &r.public_key,
            ClientRequest::Kick(r) => &r.public_key,
            ClientRequest::Rename(r) => &r.public_key,
            ClientRequest::Ping(r) => &r.public_key,
            ClientRequest::GetComputerNetworks(r) => &r.public_key,
        }
    }
}

/// A network entry as returned by `GetComputerNetworks`.
#[derive(Debug, Clone, Serialize)]
pub struct ComputerNetworkEntry {
    pub network_id: String,
    pub network_name: String,
    pub is_connected: bool,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub last_connected: chrono::DateTime<chrono::Utc>,
}

/// Server-initiated messages (replies and fan-out notifications), spec §4.1.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    NetworkCreated {
        network_id: String,
        network_name: String,
        pin: String,
        public_key: String,
    },
    NetworkJoined {
        network_id: String,
        network_name: String,
    },
    NetworkConnected {
        network_id: String,
        network_name: String,
    },
    NetworkDisconnected {
        network_id: String,
    },
    NetworkDeleted {
        network_id: String,
    },
    NetworkRenamed {
        network_id: String,
        network_name: String,
    },
    ComputerJoined {
        network_id: String,
        public_key: String,
        computer_name: String,
    },
    ComputerLeft {
        network_id: String,
        public_key: String,
    },
    ComputerConnected {
        network_id: String,
        public_key: String,
        computer_name: String,
    },
    ComputerDisconnected {
        network_id: String,
        public_key: String,
    },
    Kicked {
        network_id: String,
    },
    KickSuccess {
        network_id: String,
        target_id: String,
    },
    RenameSuccess {
        network_id: String,
        network_name: String,
    },
    DeleteSuccess {
        network_id: String,
    },
    ServerShutdown {
        message: String,
        shutdown_in_seconds: u64,
        restart_info: String,
    },
    ComputerNetworks {
        networks: Vec<ComputerNetworkEntry>,
    },
    Error {
        error: String,
        message_id: String,
    },
    Ping {
        client_timestamp: i64,
        server_timestamp: i64,
        status: String,
    },
}

/// A fully-formed outbound envelope: the `message_id` the reply correlates with,
/// plus the tagged `ServerMessage` body.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    pub message_id: String,
    #[serde(flatten)]
    pub body: ServerMessage,
}

impl OutboundEnvelope {
    pub fn new(message_id: impl Into<String>, body: ServerMessage) -> Self {
        Self {
            message_id: message_id.into(),
            body,
        }
    }

    /// Build an `Error` envelope; the `message_id` is duplicated into the payload
    /// per spec §4.1 ("Error replies always include the `error` field in the payload").
    pub fn error(message_id: impl Into<String>, err: &HandlerError) -> Self {
        let message_id = message_id.into();
        Self {
            message_id: message_id.clone(),
            body: ServerMessage::Error {
                error: err.client_message(),
                message_id,
            },
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Serialization of our own, fully-typed messages should never fail;
            // fall back to a minimal error frame rather than panicking a connection task.
            format!(
                r#"{{"message_id":"{}","type":"Error","payload":{{"error":"internal serialization error: {}","message_id":"{}"}}}}"#,
                self.message_id, e, self.message_id
            )
        })
    }
}

/// Failure from stage one of decoding: the raw envelope shape itself, or an
/// unknown/malformed `type`. Carries the `message_id` when one could be recovered.
#[derive(Debug, Clone)]
pub struct DecodeFailure {
    pub message_id: Option<String>,
    pub error: HandlerError,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    message_id: String,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    payload: Value,
}

/// Decode a raw text frame into a `(message_id, ClientRequest)` pair.
///
/// Two-stage: first the envelope shell (so a malformed payload still yields a
/// `message_id` to reply against), then the payload for the named `type`.
pub fn decode(text: &str) -> Result<(String, ClientRequest), DecodeFailure> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(|e| DecodeFailure {
        message_id: None,
        error: HandlerError::MalformedEnvelope(format!("malformed envelope: {e}")),
    })?;

    let message_id = raw.message_id;

    macro_rules! decode_payload {
        ($variant:ident, $ty:ty) => {
            serde_json::from_value::<$ty>(raw.payload)
                .map(ClientRequest::$variant)
                .map_err(|_| DecodeFailure {
                    message_id: Some(message_id.clone()),
                    error: HandlerError::Validation(format!(
                        "Invalid {} request format",
                        raw.msg_type
                    )),
                })
        };
    }

    let request = match raw.msg_type.as_str() {
        "CreateNetwork" => decode_payload!(CreateNetwork, CreateNetworkRequest),
        "JoinNetwork" => decode_payload!(JoinNetwork, JoinNetworkRequest),
        "ConnectNetwork" => decode_payload!(ConnectNetwork, ConnectNetworkRequest),
        "DisconnectNetwork" => decode_payload!(DisconnectNetwork, DisconnectNetworkRequest),
        "LeaveNetwork" => decode_payload!(LeaveNetwork, LeaveNetworkRequest),
        "Kick" => decode_payload!(Kick, KickRequest),
        "Rename" => decode_payload!(Rename, RenameRequest),
        "Ping" => decode_payload!(Ping, PingRequest),
        "GetComputerNetworks" => decode_payload!(GetComputerNetworks, GetComputerNetworksRequest),
        _ => Err(DecodeFailure {
            message_id: Some(message_id.clone()),
            error: HandlerError::UnknownType,
        }),
    }?;

    Ok((message_id, request))
}
