// Botdeck backend: HTTP API and live event streams for supervising game bots.

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use botdeck_backend::api;
use botdeck_backend::client::sim::SimConnector;
use botdeck_backend::config::Config;
use botdeck_backend::core::manager::BotManager;
use botdeck_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register();

    // The protocol connector is pluggable behind the Connector trait. The
    // simulated connector is the only one linked into this binary; a real
    // protocol client plugs in here without touching the core.
    let connector = Arc::new(SimConnector::new(true));
    let manager = Arc::new(BotManager::new(connector));

    let mut app = api::router(manager).layer(CorsLayer::permissive());
    if let Some(dir) = &config.static_dir {
        tracing::info!(path = %dir.display(), "serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("botdeck backend listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
