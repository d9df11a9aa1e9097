// src/main.rs
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::Handle;
use dotenvy::dotenv;
use livepoll::{
    config::Config,
    db::{create_pool, PgStore},
    routes,
    state::AppState,
    store::{DocumentStore, MemoryStore},
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenv().ok(); // Load environment variables from .env file

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livepoll=info,tower_http=info")),
        )
        .init();

    let config = Config::load();

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(database_url) => match connect_postgres(database_url, &config).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize database: {e}");
                std::process::exit(1);
            }
        },
        None => {
            info!("DATABASE_URL not set, keeping documents in memory");
            Arc::new(MemoryStore::new(config.feed_capacity))
        }
    };

    let state = AppState::new(store, &config);
    let app = routes::create_routes(state).layer(routes::cors(config.cors_origin.as_deref()));

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");

    if let Err(e) = axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service())
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Server shut down");
}

async fn connect_postgres(database_url: &str, config: &Config) -> livepoll::error::AppResult<PgStore> {
    let pool = create_pool(database_url, config.db_max_connections).await?;
    PgStore::connect(pool, config.feed_capacity).await
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
