// HTTP route handlers for the Sentinel API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use sentinel_common::error::{LifecycleError, StoreError};
use sentinel_common::lifecycle;
use sentinel_common::types::{Run, RunConfiguration, RunDetail};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics as api_metrics;
use crate::AppState;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn parse_run_id(run_id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(run_id).map_err(|_| {
        api_metrics::REJECTED_REQUESTS
            .with_label_values(&["invalid_run_id"])
            .inc();
        error_response(StatusCode::BAD_REQUEST, "Invalid run ID format")
    })
}

fn store_failure(run_id: Uuid, action: &str, e: &StoreError) -> Response {
    error!(run_id = %run_id, error = %e, "Failed to {}", action);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to {}: {}", action, e),
    )
}

fn not_found(run_id: Uuid) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Run {} not found", run_id))
}

/// POST /runs - Validate a configuration and queue a run for it
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(configuration): Json<RunConfiguration>,
) -> Response {
    if let Err(reason) = configuration.validate() {
        warn!(configuration = %configuration.name, reason = %reason, "Rejected configuration");
        api_metrics::REJECTED_REQUESTS
            .with_label_values(&["invalid_configuration"])
            .inc();
        return error_response(StatusCode::BAD_REQUEST, reason.to_string());
    }

    let run = Run::queued(configuration.name.clone());
    match state.submitter.submit(&run, &configuration).await {
        Ok(()) => {
            api_metrics::RUNS_SUBMITTED.inc();
            info!(
                run_id = %run.id,
                configuration = %configuration.name,
                cases = configuration.selected_cases().count(),
                destructive = configuration.destructive_enabled,
                "Run queued"
            );
            (StatusCode::ACCEPTED, Json(run)).into_response()
        }
        Err(e) => store_failure(run.id, "queue run", &e),
    }
}

/// GET /runs/{run_id} - Run with its results and per-status counts
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let run = match state.store.load_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return not_found(run_id),
        Err(e) => return store_failure(run_id, "load run", &e),
    };

    match state.store.results(run_id).await {
        Ok(results) => (StatusCode::OK, Json(RunDetail::new(run, results))).into_response(),
        Err(e) => store_failure(run_id, "load results", &e),
    }
}

/// GET /runs/{run_id}/status - Non-blocking status read
pub async fn get_run_status(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.store.load_run(run_id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(run.summary())).into_response(),
        Ok(None) => not_found(run_id),
        Err(e) => store_failure(run_id, "load run", &e),
    }
}

/// POST /runs/{run_id}/cancel - Cancel a pending, queued or running run
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match lifecycle::cancel(state.store.as_ref(), run_id).await {
        Ok(run) => {
            api_metrics::RUNS_CANCELLED.inc();
            (StatusCode::OK, Json(run)).into_response()
        }
        Err(StoreError::Lifecycle(e @ LifecycleError::NotCancellable { .. })) => {
            info!(run_id = %run_id, reason = %e, "Cancel rejected");
            api_metrics::REJECTED_REQUESTS
                .with_label_values(&["not_cancellable"])
                .inc();
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) if e.is_not_found() => not_found(run_id),
        Err(e) => store_failure(run_id, "cancel run", &e),
    }
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, api_metrics::render())
}
