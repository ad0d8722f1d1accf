mod actions;
mod auth;
mod cli;
mod config;
mod directory;
mod error;
mod history;
mod notify;
mod presence;
mod protocol;
mod relay;
mod room;
mod storage;
mod sync;
#[cfg(test)]
mod testing;
mod websocket;

use axum::{routing::get, Json, Router};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::directory::{AccountDirectory, HttpDirectory, StaticDirectory};
use crate::history::{HistoryLog, HttpHistory, MemoryHistory};
use crate::notify::{HttpNotifier, NoopNotifier, Notifier};
use crate::presence::Presence;
use crate::storage::{MemoryStore, RedisStore, RoomStore};
use crate::websocket::{websocket_handler, ServerState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Some(Commands::Watch { url, token }) = cli.command {
        if let Err(e) = cli::run_watch_client(url, token).await {
            error!("watch client error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(redis_url) = cli.redis_url {
        config.redis_url = redis_url;
    }

    info!(
        port = config.port,
        redis_url = %config.redis_url,
        room_ttl_seconds = config.room_ttl_seconds,
        sync_interval_ms = config.sync_interval_ms,
        "starting nook session server"
    );

    let store: Arc<dyn RoomStore> = if config.redis_url == "memory://" {
        warn!("using the in-memory room store; rooms will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        match RedisStore::new(&config.redis_url, config.room_ttl_seconds).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("failed to connect to redis: {}", e);
                std::process::exit(1);
            }
        }
    };

    let directory: Arc<dyn AccountDirectory> = match &config.account_service_url {
        Some(url) => Arc::new(HttpDirectory::new(url)),
        None => {
            warn!("ACCOUNT_SERVICE_URL not set; every connection will be rejected");
            Arc::new(StaticDirectory::new())
        }
    };
    let history: Arc<dyn HistoryLog> = match &config.history_service_url {
        Some(url) => Arc::new(HttpHistory::new(url)),
        None => {
            warn!("HISTORY_SERVICE_URL not set; chat and journal history is process-local");
            Arc::new(MemoryHistory::new())
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.push_service_url {
        Some(url) => Arc::new(HttpNotifier::new(url)),
        None => {
            info!("PUSH_SERVICE_URL not set; push notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    let state = ServerState {
        config: Arc::new(config.clone()),
        store,
        directory,
        history,
        notifier,
        presence: Presence::new(),
    };

    // Process-lifetime master clock.
    sync::spawn(state.clone());

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("nook session server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
