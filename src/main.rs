mod analytics;
mod config;
mod db;
mod errors;
mod feeds;
mod server;
mod signals;
mod state;
mod store;

use crate::state::{AppState, DbCommand};
use crate::store::{MemoryStore, PortfolioStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("finsight backend starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    for (name, key) in [
        ("market data", &cfg.alpha_vantage_api_key),
        ("news", &cfg.gnews_api_key),
        ("llm", &cfg.groq_api_key),
    ] {
        if key.is_none() {
            tracing::warn!("no {name} key configured, serving deterministic fallbacks");
        }
    }

    // Storage: SQLite when the data dir opens, otherwise in-process memory
    let (store, db_pool, db_tx) = match db::init_db(&cfg.data_dir) {
        Ok(pool) => {
            let (db_tx, db_rx) = mpsc::channel::<DbCommand>(1024);

            // DB writer task (dedicated, owns prediction writes)
            let writer_pool = pool.clone();
            tokio::spawn(async move {
                db::run_db_writer(writer_pool, db_rx).await;
            });

            let store: Arc<dyn PortfolioStore> = Arc::new(db::SqliteStore::new(pool.clone()));
            (store, Some(pool), Some(db_tx))
        }
        Err(e) => {
            tracing::warn!("database unavailable ({e}), using in-memory store");
            let store: Arc<dyn PortfolioStore> = Arc::new(MemoryStore::new());
            (store, None, None)
        }
    };

    let port = cfg.server_port;
    let app_state = AppState::new(cfg, store, db_pool, db_tx);
    let app = server::build_router(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        tracing::error!("server error: {e}");
    }
}
