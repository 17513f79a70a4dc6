mod aggregator;
mod cases;
mod cleanup;
mod coordinator;
mod executor;
mod metrics;
mod resources;
mod simulated;
mod target;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use coordinator::Coordinator;
use sentinel_common::config::Settings;
use sentinel_common::redis::{self, RedisStore};
use simulated::SimulatedTarget;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Sentinel Worker booting...");

    let settings = Settings::from_env().context("Invalid settings")?;
    metrics::register().context("Failed to register metrics")?;

    let worker_id = format!("worker-{}", std::process::id());
    info!(
        worker = %worker_id,
        concurrency = settings.worker_concurrency,
        case_timeout_s = settings.case_timeout.map(|d| d.as_secs()),
        "Worker configured"
    );

    let store = RedisStore::connect(&settings.redis_url, settings.result_ttl_seconds)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))?;
    info!("Connected to Redis: {}", settings.redis_url);

    let store = Arc::new(store);
    let coordinator = Arc::new(
        Coordinator::new(
            store.clone(),
            store.clone(),
            Arc::new(SimulatedTarget::new()),
            worker_id.clone(),
        )
        .with_case_timeout(settings.case_timeout),
    );

    spawn_health_server(&settings.worker_health_addr, worker_id).await?;

    let semaphore = Arc::new(Semaphore::new(settings.worker_concurrency));
    let mut conn = store.connection();

    // Setup graceful shutdown
    let shutdown = async {
        signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, no longer taking runs");
    };

    tokio::select! {
        result = worker_loop(&mut conn, &coordinator, &semaphore) => {
            if let Err(e) = result {
                error!(error = %e, "Worker loop stopped");
            }
        },
        _ = shutdown => {},
    }

    // Every permit back means every in-flight run reached a terminal state
    info!("Waiting for in-flight runs to finish");
    let _drained = semaphore
        .acquire_many(settings.worker_concurrency as u32)
        .await
        .context("Run semaphore closed")?;

    info!("Worker shutdown complete");
    Ok(())
}

async fn spawn_health_server(addr: &str, worker_id: String) -> anyhow::Result<()> {
    let app = Router::new()
        .route(
            "/health",
            get(move || {
                let worker_id = worker_id.clone();
                async move { Json(serde_json::json!({ "status": "ok", "worker": worker_id })) }
            }),
        )
        .route("/metrics", get(|| async { metrics::render() }));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", addr))?;
    info!("Health endpoint listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Health server error");
        }
    });
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    conn: &mut ::redis::aio::ConnectionManager,
    coordinator: &Arc<Coordinator>,
    semaphore: &Arc<Semaphore>,
) -> anyhow::Result<()> {
    loop {
        // Only pop when a run could start right away
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Run semaphore closed")?;

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_run(conn, 5.0).await {
            Ok(Some(run_id)) => {
                info!(run_id = %run_id, "Received run");
                let handle = coordinator.start(run_id);
                tokio::spawn(async move {
                    if let Err(e) = handle.await {
                        error!(run_id = %run_id, error = %e, "Run task aborted");
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
