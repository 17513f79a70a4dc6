// Prometheus metrics for the trigger surface

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref RUNS_SUBMITTED: IntCounter =
        IntCounter::new("sentinel_runs_submitted_total", "Runs accepted and queued")
            .expect("metric can be created");

    pub static ref RUNS_CANCELLED: IntCounter =
        IntCounter::new("sentinel_runs_cancelled_total", "Runs cancelled through the API")
            .expect("metric can be created");

    pub static ref REJECTED_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("sentinel_api_rejected_total", "Requests answered with a client error"),
        &["reason"]
    )
    .expect("metric can be created");
}

pub fn register() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RUNS_SUBMITTED.clone()))?;
    REGISTRY.register(Box::new(RUNS_CANCELLED.clone()))?;
    REGISTRY.register(Box::new(REJECTED_REQUESTS.clone()))?;
    Ok(())
}

pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
