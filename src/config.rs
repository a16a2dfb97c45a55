//! Typed, environment-driven startup configuration (spec §4.9, §6).
//!
//! Parsed once in `main` into an immutable [`Config`] and threaded through
//! every component by reference/clone — no global mutable config, per
//! SPEC_FULL.md §9 "Global mutable state". Mirrors the `clap::Parser` +
//! `env`-attribute idiom used for CLI/env config in `ChainSafe-Delorean-Protocol`.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "meshd", about = "Signaling and membership server for the mesh overlay network")]
pub struct Config {
    /// TCP port the server listens on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// When true, the CORS layer allows any origin.
    #[arg(long, env = "ALLOW_ALL_ORIGINS", default_value_t = true)]
    pub allow_all_origins: bool,

    /// Maximum number of simultaneously attached connections per network.
    #[arg(long, env = "MAX_CLIENTS_PER_NETWORK", default_value_t = 50)]
    pub max_clients_per_network: usize,

    /// Networks idle longer than this many days are reaped.
    #[arg(long, env = "NETWORK_EXPIRY_DAYS", default_value_t = 7)]
    pub network_expiry_days: i64,

    /// Interval, in hours, between Stale-Network Reaper sweeps.
    #[arg(long, env = "CLEANUP_INTERVAL_HOURS", default_value_t = 24)]
    pub cleanup_interval_hours: u64,

    /// Deadline, in seconds, the Shutdown Coordinator allows for draining connections.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value_t = 2)]
    pub shutdown_timeout_seconds: u64,

    #[arg(long, env = "READ_BUFFER_SIZE", default_value_t = 1024)]
    pub read_buffer_size: usize,

    #[arg(long, env = "WRITE_BUFFER_SIZE", default_value_t = 1024)]
    pub write_buffer_size: usize,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Require Ed25519 signature verification (in addition to public-key
    /// equality) for owner-privileged operations: Kick, Rename, owner Leave.
    #[arg(long, env = "REQUIRE_SIGNATURES", default_value_t = false)]
    pub require_signatures: bool,

    /// Optional external record-store endpoint; absent ⇒ in-memory store.
    #[arg(long, env = "RECORD_STORE_ENDPOINT")]
    pub record_store_endpoint: Option<String>,

    /// API key for the external record-store endpoint, if configured.
    #[arg(long, env = "RECORD_STORE_API_KEY")]
    pub record_store_api_key: Option<String>,
}

impl Config {
    pub fn network_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.network_expiry_days)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_hours * 3600)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_seconds)
    }
}
