//! opencawt-node — the OpenCawt service binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the persistent store
//!   2. Build the shared collaborators (beacon client, mint backend, webhook
//!      sender) from config
//!   3. Start the session engine's tick loop (spec §4.6)
//!   4. Start the seal-job sweeper loop (spec §4.8)
//!   5. Start the idempotency-row sweeper loop (spec §4.2)
//!   6. Serve the HTTP surface until a shutdown signal arrives, then stop
//!      the background loops and let in-flight requests finish

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use opencawt_core::config::{Config, DrandMode, SolanaMode};
use opencawt_engine::clock::SystemClock;
use opencawt_engine::webhook::WebhookSender;
use opencawt_engine::{SealSweeper, SessionEngine};
use opencawt_http::AppState;
use opencawt_mint::{InMemoryMintWorker, MintBackend, MintWorkerClient};
use opencawt_store::StoreDb;

#[derive(Parser, Debug)]
#[command(
    name = "opencawt-node",
    version,
    about = "OpenCawt notarisation and adjudication service"
)]
struct Args {
    /// Path to a JSON config file. Without this flag the service runs with
    /// `Config::default()` — stub beacon, stub mint worker, local sled DB.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `Config::api_port` without editing the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opencawt=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("OpenCawt node starting");

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path).context("loading config")?,
        None => {
            tracing::warn!("no --config given, running with Config::default() (stub collaborators)");
            Config::default()
        }
    };
    if let Some(port) = args.port {
        config.api_port = port;
    }
    let config = Arc::new(config);

    // ── Persistent store ──────────────────────────────────────────────────────
    std::fs::create_dir_all(&config.db_path)
        .with_context(|| format!("creating db dir {}", config.db_path))?;
    let store = Arc::new(StoreDb::open(&config.db_path).context("opening store")?);

    // ── Shared collaborators ──────────────────────────────────────────────────
    let clock: Arc<dyn opencawt_engine::Clock> = Arc::new(SystemClock);
    let beacon = Arc::new(opencawt_beacon::BeaconClient::new(
        config.drand_mode,
        config.drand_base_url.clone(),
    ));
    let mint_backend = Arc::new(match config.seal_worker_mode {
        SolanaMode::Stub => MintBackend::Stub(InMemoryMintWorker::new()),
        SolanaMode::Rpc => MintBackend::Live(MintWorkerClient::new(
            config.mint_worker_url.clone(),
            config.worker_token.clone(),
        )),
    });
    let webhooks = Arc::new(WebhookSender::new(config.webhook_signing_key.clone().into_bytes()));
    if matches!(config.drand_mode, DrandMode::Stub) {
        tracing::warn!("drand_mode=stub — jury selection randomness is locally derived, not from a public beacon");
    }

    // ── Session engine ────────────────────────────────────────────────────────
    let engine = Arc::new(SessionEngine::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&clock),
        Arc::clone(&beacon),
    ));
    let engine_handle = engine.clone().start();

    // ── Seal-job sweeper ──────────────────────────────────────────────────────
    let sweeper = Arc::new(
        SealSweeper::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&mint_backend),
            Arc::clone(&webhooks),
            config.seal_sweep_interval_secs,
            config.seal_max_attempts,
        )
        .with_retry_backoff_minutes(1),
    );
    let sweeper_handle = sweeper.start();

    // ── Idempotency-row sweeper (spec §4.2: "expired rows are swept") ────────
    let idempotency_store = Arc::clone(&store);
    let idempotency_clock = Arc::clone(&clock);
    let idempotency_stop = Arc::new(tokio::sync::Notify::new());
    let idempotency_stop_rx = idempotency_stop.clone();
    let idempotency_join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = idempotency_clock.now();
                    match opencawt_store::idempotency::sweep_expired(&idempotency_store, now) {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(swept = n, "idempotency rows expired"),
                        Err(e) => tracing::error!(error = %e, "idempotency sweep failed"),
                    }
                    // Rate-limit windows never exceed 24h (spec §4.3); drop
                    // anything older so the tree doesn't grow unbounded.
                    match opencawt_store::ratelimit::sweep_older_than(&idempotency_store, now - 24 * 3600) {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(swept = n, "rate-limit rows expired"),
                        Err(e) => tracing::error!(error = %e, "rate-limit sweep failed"),
                    }
                }
                _ = idempotency_stop_rx.notified() => break,
            }
        }
    });

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let state = AppState {
        store: Arc::clone(&store),
        config: Arc::clone(&config),
        clock: Arc::clone(&clock),
        webhooks,
    };
    let router = opencawt_http::build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port)
        .parse()
        .context("parsing api_host:api_port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "node ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("shutdown signal received, stopping background loops");
    engine_handle.stop().await;
    sweeper_handle.stop().await;
    idempotency_stop.notify_one();
    let _ = idempotency_join.await;

    Ok(())
}

/// Waits for SIGINT (or SIGTERM on unix), giving `axum::serve` a clean point
/// to stop accepting new connections while in-flight handlers finish (spec
/// §5: "graceful-shutdown signal stops accepting new requests... then halts
/// the engine loop").
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
