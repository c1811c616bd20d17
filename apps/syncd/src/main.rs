//! Propledger synchronization daemon.
//!
//! Assembles the engine, the schedule registry, the maintenance queue
//! worker, and the HTTP API, then serves until shutdown.

mod config;
mod logging;

use std::net::SocketAddr;

use config::Config;
use propledger_api_sync::{sync_router, SyncApiState};
use propledger_sync::SyncEngine;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        "Starting propledger syncd"
    );

    // Separate pools per store: no shared transaction boundary exists.
    let ops = match propledger_db::connect(&config.ops_database_url).await {
        Ok(pool) => {
            info!("Operational store connection established");
            pool
        }
        Err(e) => {
            eprintln!("Failed to connect to operational store: {e}");
            std::process::exit(1);
        }
    };

    let ledger = match propledger_db::connect(&config.ledger_database_url).await {
        Ok(pool) => {
            info!("Ledger store connection established");
            pool
        }
        Err(e) => {
            eprintln!("Failed to connect to ledger store: {e}");
            std::process::exit(1);
        }
    };

    if config.run_migrations {
        if let Err(e) = propledger_db::migrations::migrate_ledger(&ledger).await {
            eprintln!("Ledger store migration failed: {e}");
            std::process::exit(1);
        }
        // Ops migrations install the change-feed triggers; a read-only
        // grant on a shared operational store makes this fail, which only
        // costs push mode.
        if let Err(e) = propledger_db::migrations::migrate_ops(&ops).await {
            warn!(error = %e, "Operational store migration failed; push-mode detection may be unavailable");
        }
    }

    let engine = SyncEngine::new(ops, ledger, config.engine.clone());

    if config.auto_start {
        match engine.start().await {
            Ok(mode) => info!(mode = %mode, "Synchronization started"),
            Err(e) => {
                // The API can still start sync later; boot continues.
                error!(error = %e, "Failed to start synchronization at boot");
            }
        }
    }

    let app = sync_router(SyncApiState::new(engine.clone()))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(1_048_576))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    info!(%addr, "Server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }

    // Stop timers and let in-flight operations finish.
    engine.stop().await;
    info!("Server shutdown complete");
}

/// Graceful shutdown signal handler (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
