// Prometheus metrics for the worker, served on the health listener

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref RUNS_STARTED: IntCounter =
        IntCounter::new("sentinel_runs_started_total", "Runs picked up by this worker")
            .expect("metric can be created");

    pub static ref RUNS_FINISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("sentinel_runs_finished_total", "Runs finalized, by overall status"),
        &["overall_status"]
    )
    .expect("metric can be created");

    pub static ref RUNS_IN_FLIGHT: IntGauge =
        IntGauge::new("sentinel_runs_in_flight", "Runs currently executing")
            .expect("metric can be created");

    pub static ref CASE_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("sentinel_case_results_total", "Case results persisted, by status"),
        &["status"]
    )
    .expect("metric can be created");
}

/// Register every collector once at boot.
pub fn register() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RUNS_STARTED.clone()))?;
    REGISTRY.register(Box::new(RUNS_FINISHED.clone()))?;
    REGISTRY.register(Box::new(RUNS_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(CASE_RESULTS.clone()))?;
    Ok(())
}

/// Text exposition of the registry.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
