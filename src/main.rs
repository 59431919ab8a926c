use atlas::config::config;
use atlas::database::DatabaseManager;
use atlas::{app, logging};

#[tokio::main]
async fn main() {
    // Load .env before the config singleton reads the environment
    let _ = dotenvy::dotenv();
    logging::init();

    let config = config();
    tracing::info!("Starting Atlas in {:?} mode", config.environment);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Atlas listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app()).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!("Server error: {}", e);
    }
    DatabaseManager::close().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
