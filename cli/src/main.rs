//! ergindex daemon — syncs a UTxO node into the relational store.
//!
//! Usage:
//! ```bash
//! ergindex run        # start the sync pipeline (default)
//! ergindex version    # print version
//! ergindex help       # print this help
//! ```
//!
//! Configuration comes from the environment (`NODE_URL`, `DATABASE_URL`,
//! `POLL_INTERVAL_MS`, ...); see `IndexerConfig::from_env`. Exit code 0 on
//! clean shutdown (SIGINT/SIGTERM), non-zero on fatal errors.

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use ergindex_core::metrics::Metrics;
use ergindex_core::IndexerConfig;
use ergindex_node::{NodeApi, NodeClient};
use ergindex_storage::PgStore;
use ergindex_sync::SyncController;

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("run") => {}
        Some("version") | Some("--version") | Some("-V") => {
            println!("ergindex {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            return;
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(2);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    if let Err(err) = runtime.block_on(run()) {
        tracing::error!(error = %err, "exiting on fatal error");
        process::exit(1);
    }
}

fn print_usage() {
    println!("ergindex {}", env!("CARGO_PKG_VERSION"));
    println!("UTxO chain indexer\n");
    println!("USAGE:");
    println!("    ergindex [COMMAND]\n");
    println!("COMMANDS:");
    println!("    run      Start the sync pipeline (default)");
    println!("    version  Print version");
    println!("    help     Print this help");
}

async fn run() -> anyhow::Result<()> {
    let config = IndexerConfig::from_env();
    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    tracing::info!(
        node = %config.node_url,
        batch_size = config.batch_size,
        max_workers = config.max_workers,
        network_prefix = config.network_prefix,
        "starting ergindex"
    );

    let store = Arc::new(
        PgStore::connect(&database_url)
            .await
            .context("connecting to the store")?,
    );

    let metrics = Arc::new(Metrics::default());
    let node = Arc::new(NodeClient::new(&config, Arc::clone(&metrics)));

    let info = node.info().await.context("probing node /info")?;
    tracing::info!(
        full_height = info.full_height,
        version = info.app_version.as_deref().unwrap_or("unknown"),
        "connected to node"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = SyncController::new(
        Arc::clone(&store),
        node,
        config,
        Arc::clone(&metrics),
        shutdown_rx,
    );
    let mut pipeline = tokio::spawn(controller.run());

    tokio::select! {
        // The pipeline only exits on its own when something fatal happened.
        result = &mut pipeline => {
            result.context("pipeline task panicked")?
                .map_err(|err| anyhow::anyhow!(err))?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining in-flight commits");
            let _ = shutdown_tx.send(true);
            pipeline
                .await
                .context("pipeline task panicked")?
                .map_err(|err| anyhow::anyhow!(err))?;
        }
    }

    tracing::info!(snapshot = ?metrics.snapshot(), "ergindex stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
