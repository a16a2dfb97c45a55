//! Stats Collector (spec §4.7): atomic counters so no component needs to
//! contend with the Session Registry lock just to bump a number.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub struct Stats {
    start_time: DateTime<Utc>,
    connections_total: AtomicU64,
    active_connections: AtomicU64,
    active_networks: AtomicU64,
    peak_connections: AtomicU64,
    peak_networks: AtomicU64,
    messages_processed: AtomicU64,
    last_cleanup_time: AtomicI64,
    stale_networks_removed: AtomicU64,
}

/// Point-in-time snapshot, serializable for the `/stats` endpoint (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub start_time: DateTime<Utc>,
    /// Human-readable `"<d>d <h>h <m>m <s>s"` rendering of the uptime, per spec §4.7.
    pub uptime: String,
    pub uptime_seconds: i64,
    pub connections_total: u64,
    pub active_connections: u64,
    pub active_networks: u64,
    pub peak_connections: u64,
    pub peak_networks: u64,
    pub messages_processed: u64,
    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub stale_networks_removed: u64,
    pub version: String,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            connections_total: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            active_networks: AtomicU64::new(0),
            peak_connections: AtomicU64::new(0),
            peak_networks: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            last_cleanup_time: AtomicI64::new(0),
            stale_networks_removed: AtomicU64::new(0),
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.bump_peak(&self.peak_connections, active);
    }

    pub fn record_connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_networks(&self, count: u64) {
        self.active_networks.store(count, Ordering::Relaxed);
        self.bump_peak(&self.peak_networks, count);
    }

    pub fn record_cleanup(&self, removed: u64) {
        self.last_cleanup_time.store(Utc::now().timestamp(), Ordering::Relaxed);
        self.stale_networks_removed.fetch_add(removed, Ordering::Relaxed);
    }

    fn bump_peak(&self, peak: &AtomicU64, candidate: u64) {
        let mut current = peak.load(Ordering::Relaxed);
        while candidate > current {
            match peak.compare_exchange_weak(
                current,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_cleanup = self.last_cleanup_time.load(Ordering::Relaxed);
        let uptime_seconds = (Utc::now() - self.start_time).num_seconds();
        StatsSnapshot {
            start_time: self.start_time,
            uptime: format_uptime(uptime_seconds),
            uptime_seconds,
            connections_total: self.connections_total.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            active_networks: self.active_networks.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            peak_networks: self.peak_networks.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            last_cleanup_time: if last_cleanup == 0 {
                None
            } else {
                DateTime::from_timestamp(last_cleanup, 0)
            },
            stale_networks_removed: self.stale_networks_removed.load(Ordering::Relaxed),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a second count as `"<d>d <h>h <m>m <s>s"`, dropping leading zero units.
fn format_uptime(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
