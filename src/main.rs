//! Process entry point: parses configuration, wires the components
//! described in `SPEC_FULL.md` §2 together, and serves the external
//! endpoints until a shutdown signal drains and closes them.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshd::config::Config;
use meshd::endpoints::{build_router, AppState};
use meshd::network::NetworkManager;
use meshd::outbox::Outbox;
use meshd::rate_limit::RateLimiter;
use meshd::reaper::Reaper;
use meshd::session::SessionRegistry;
use meshd::shutdown::ShutdownCoordinator;
use meshd::stats::Stats;
use meshd::store::{InMemoryStore, RecordStore};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    if config.record_store_endpoint.is_some() {
        tracing::warn!(
            "RECORD_STORE_ENDPOINT is configured, but this build ships only the in-process \
             reference store (spec §6 treats the external store as an abstract collaborator); \
             falling back to the in-memory implementation"
        );
    }
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());

    // Startup reconciliation (spec §3, §9 "Durable/ephemeral drift"): in-memory
    // session state is always empty at this point, so any lingering
    // `is_connected=true` row reflects a prior crash, not reality.
    store.reset_all_connected_flags().await?;

    let sessions = Arc::new(SessionRegistry::new());
    let outbox = Arc::new(Outbox::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let stats = Arc::new(Stats::new());

    let manager = Arc::new(NetworkManager::new(
        store.clone(),
        sessions.clone(),
        outbox.clone(),
        rate_limiter,
        stats.clone(),
        config.clone(),
    ));

    let (coordinator, mut shutdown_rx) = ShutdownCoordinator::new(
        sessions,
        outbox,
        store.clone(),
        manager.clone(),
        config.shutdown_timeout(),
    );
    let coordinator = Arc::new(coordinator);

    let reaper = Reaper::new(
        store,
        stats,
        config.network_expiry(),
        config.cleanup_interval(),
    );
    tokio::spawn(reaper.run(coordinator.subscribe()));
    tokio::spawn(coordinator.clone().run_signal_listener());

    let state = AppState::new(manager);
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = axum::Server::try_bind(&addr)
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    tracing::info!(%addr, "meshd listening");

    let mut deadline_rx = coordinator.subscribe();
    let server = listener
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
    tokio::pin!(server);

    // The deadline clock only starts once a shutdown is actually signaled —
    // not from process start — racing graceful drain against a hard cutoff.
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            let _ = deadline_rx.changed().await;
            tokio::time::sleep(coordinator.deadline()).await;
        } => {
            tracing::warn!("shutdown deadline elapsed before all connections drained");
        }
    }

    Ok(())
}
