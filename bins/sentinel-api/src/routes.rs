// Route table for the Sentinel API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runs", post(handlers::create_run))
        .route("/runs/:run_id", get(handlers::get_run))
        .route("/runs/:run_id/status", get(handlers::get_run_status))
        .route("/runs/:run_id/cancel", post(handlers::cancel_run))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
