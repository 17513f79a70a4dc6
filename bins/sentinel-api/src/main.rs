mod handlers;
mod metrics;
mod routes;

use axum::Router;
use sentinel_common::config::Settings;
use sentinel_common::redis::RedisStore;
use sentinel_common::store::{ResultStore, RunSubmitter};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub store: Arc<dyn ResultStore>,
    pub submitter: Arc<dyn RunSubmitter>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Sentinel API booting...");

    let settings = Settings::from_env().expect("Invalid settings");
    metrics::register().expect("Failed to register metrics");

    // Connect to Redis
    let store = RedisStore::connect(&settings.redis_url, settings.result_ttl_seconds)
        .await
        .expect("Failed to connect to Redis");

    info!("Connected to Redis: {}", settings.redis_url);

    let store = Arc::new(store);
    let state = Arc::new(AppState {
        store: store.clone(),
        submitter: store,
    });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let listener = TcpListener::bind(&settings.api_bind_addr)
        .await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", settings.api_bind_addr);
    info!("Ready to accept runs");

    axum::serve(listener, app).await.expect("Server error");
}
