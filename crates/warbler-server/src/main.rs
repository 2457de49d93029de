mod config;

use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use warbler_api::AppStateInner;
use warbler_db::Database;

use crate::config::{Config, DEV_SECRET, DatabaseLocation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warbler=debug,warbler_api=debug,warbler_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.secret_key == DEV_SECRET {
        warn!("WARBLER_SECRET_KEY is unset; sessions are signed with the development placeholder");
    }

    // Init database
    let db = match &config.database {
        DatabaseLocation::File(path) => Database::open(path)?,
        DatabaseLocation::Memory => Database::open_in_memory()?,
    };
    if config.reset_db {
        warn!("WARBLER_RESET_DB set, dropping and recreating all tables");
        db.reset()?;
    }

    let state = AppStateInner::new(db, config.secret_key.clone())?;

    let app = Router::new()
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .merge(warbler_api::router(state))
        .layer(TraceLayer::new_for_http());

    info!("Warbler listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
