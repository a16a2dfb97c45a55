//! Per-connection outbound delivery channels, kept independent of the
//! [`crate::session::SessionRegistry`] lock (spec §4.4 "transport plumbing is
//! not part of the locked state") so a slow client never holds up membership
//! bookkeeping for everyone else.
//!
//! Grounded on `maidsafe-temp_safe_network`'s connection-table pattern: a
//! [`dashmap::DashMap`] keyed by connection id, one per-key lock at most, no
//! single bottleneck.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::codec::{ConnId, OutboundEnvelope};

/// An item on a connection's outbound queue: either an envelope to write, or
/// a directive to close the transport once prior sends have flushed (spec
/// §4.5.6 Kick: "closes its transport"). Using one channel for both keeps the
/// close ordered strictly after whatever was sent just before it (e.g.
/// `Kicked`), since an unbounded mpsc channel preserves send order.
#[derive(Debug, Clone)]
pub enum OutboxItem {
    Envelope(OutboundEnvelope),
    Close,
}

pub type Sender = mpsc::UnboundedSender<OutboxItem>;
pub type Receiver = mpsc::UnboundedReceiver<OutboxItem>;

/// Registry of outbound channels, one per live connection.
#[derive(Default)]
pub struct Outbox {
    senders: DashMap<ConnId, Sender>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection and return the receiving half of its channel.
    pub fn register(&self, conn: ConnId) -> Receiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(conn, tx);
        rx
    }

    pub fn unregister(&self, conn: ConnId) {
        self.senders.remove(&conn);
    }

    /// Best-effort delivery: a closed channel means the connection is already
    /// tearing down, which is not this call's problem to report.
    pub fn send(&self, conn: ConnId, envelope: OutboundEnvelope) {
        if let Some(tx) = self.senders.get(&conn) {
            let _ = tx.send(OutboxItem::Envelope(envelope));
        }
    }

    pub fn send_to_many(&self, conns: impl IntoIterator<Item = ConnId>, envelope: OutboundEnvelope) {
        for conn in conns {
            // Each recipient gets its own clone since `OutboundEnvelope` carries
            // a per-recipient-irrelevant but still owned body.
            self.send(conn, envelope.clone());
        }
    }

    /// Queue `conn`'s transport to close once everything sent before this
    /// call has been flushed (spec §4.5.6).
    pub fn close(&self, conn: ConnId) {
        if let Some(tx) = self.senders.get(&conn) {
            let _ = tx.send(OutboxItem::Close);
        }
    }

    /// Snapshot of every currently-registered connection, for broadcast (spec §4.8).
    pub fn all_connections(&self) -> Vec<ConnId> {
        self.senders.iter().map(|e| *e.key()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }
}
