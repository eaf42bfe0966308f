//! Streamgate — HTTP byte-range gateway for files stored in a chat backend.
//!
//! This is the binary entry point. See the `streamgate` library for the
//! core functionality.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use streamgate::upstream::Connector;
use streamgate::{
    keepalive, props, session, AppState, AuthStore, ClientFleet, ClientIdentity, Config,
    PropsCache, TcpConnector,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line options. Everything else comes from `STREAMGATE_*`
/// environment variables.
#[derive(Debug, Parser)]
#[command(name = "streamgate", version, about)]
struct Cli {
    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,
    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let connector: Arc<dyn Connector> =
        Arc::new(TcpConnector::new(config.upstream_addrs.clone()));
    let store = AuthStore::new(config.session_dir.clone());

    // One identity per configured bot token; the tokens themselves are
    // spent by the (external) bot layer, identities here are keyed by index.
    let mut clients = Vec::new();
    for i in 0..config.client_tokens().len() {
        let name = format!("client_{}", i + 1);
        let identity = ClientIdentity::connect(
            name.clone(),
            Arc::clone(&connector),
            config.home_dc,
            config.max_streams_per_dc,
            store.clone(),
        )
        .await
        .with_context(|| format!("connecting {name}"))?;
        log::info!("{name} connected (home dc {})", config.home_dc);
        clients.push(Arc::new(identity));
    }

    let fleet = Arc::new(ClientFleet::new(clients, config.global_stream_limit));
    let cache = Arc::new(PropsCache::new(config.storage_channel_id));

    // Background upkeep: cache flush, idle session reaping, keepalive.
    let _flusher = props::spawn_flusher(Arc::clone(&cache));
    let _reapers: Vec<_> = fleet
        .clients()
        .iter()
        .map(|c| session::spawn_reaper(Arc::clone(c.pool())))
        .collect();
    let _keepalive = keepalive::spawn(Arc::clone(&fleet));

    let state = AppState {
        fleet,
        cache,
        config: Arc::clone(&config),
        started: Instant::now(),
    };
    let app = streamgate::router(state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!(
        "streamgate v{} listening on {addr}, public prefix {}",
        env!("CARGO_PKG_VERSION"),
        config.public_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    Ok(())
}
