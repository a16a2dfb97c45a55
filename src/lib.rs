//! `meshd`: the session and network-state manager for a peer overlay
//! network's signaling server.
//!
//! Accepts WebSocket connections, multiplexes typed request/response
//! envelopes over them, and drives the lifecycle of PIN-protected
//! "networks" (create, join, connect, disconnect, leave, kick, rename,
//! stale-expiry) while keeping an in-memory session view consistent with a
//! durable record store. See `SPEC_FULL.md` for the full design.

pub mod codec;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod identity;
pub mod network;
pub mod outbox;
pub mod rate_limit;
pub mod reaper;
pub mod session;
pub mod shutdown;
pub mod stats;
pub mod store;

pub use config::Config;
pub use network::NetworkManager;
pub use store::{InMemoryStore, RecordStore};
