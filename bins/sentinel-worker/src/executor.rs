/// Case Executor - Runs One Case and Records Exactly One Result
///
/// **Normalization Rules:**
/// - Case not invoked (disabled)     → skipped, duration 0, message = reason
/// - Case returns `success = true`   → pass
/// - Case returns `success = false`  → fail, message and error kept verbatim
/// - Case returns `Err` or panics    → error, message = error text, logs = error chain
/// - Case exceeds the time budget    → error (only when a budget is configured)
///
/// **Guarantees:**
/// - One `CaseResult` write per invocation, with wall-clock duration measured
///   around the case body
/// - Captured data and error payloads are capped at `MAX_CAPTURE_CHARS`
/// - No retries: a case runs at most once
///
/// A case failing never aborts the suite. The only error this module
/// returns is a failure to persist, which the coordinator treats as fatal.

use crate::metrics;
use futures_util::FutureExt;
use sentinel_common::error::StoreError;
use sentinel_common::store::ResultStore;
use sentinel_common::types::{CaseResult, CaseStatus};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Cap on captured data / error payloads, in characters
pub const MAX_CAPTURE_CHARS: usize = 1500;

/// What a case body reports back when it runs to completion
#[derive(Debug, Clone, Default)]
pub struct CaseOutcome {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl CaseOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach a payload; unserializable values are recorded as their error.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.data = Some(
            serde_json::to_value(data)
                .unwrap_or_else(|e| serde_json::Value::String(format!("<unserializable: {}>", e))),
        );
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Keep at most `MAX_CAPTURE_CHARS` characters of `text`.
pub fn truncate_capture(text: &str) -> String {
    match text.char_indices().nth(MAX_CAPTURE_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Normalized result before it is stamped with ids and timestamps
struct Normalized {
    status: CaseStatus,
    message: String,
    logs: Option<String>,
}

fn normalize(outcome: anyhow::Result<CaseOutcome>) -> Normalized {
    match outcome {
        Ok(outcome) if outcome.success => Normalized {
            status: CaseStatus::Pass,
            message: if outcome.message.is_empty() {
                "Case executed successfully.".to_string()
            } else {
                outcome.message
            },
            logs: outcome
                .data
                .map(|data| format!("Data: {}", truncate_capture(&data.to_string()))),
        },
        Ok(outcome) => Normalized {
            status: CaseStatus::Fail,
            message: if outcome.message.is_empty() {
                "Case reported failure.".to_string()
            } else {
                outcome.message
            },
            logs: outcome
                .error
                .map(|error| format!("Error Details: {}", truncate_capture(&error))),
        },
        Err(e) => Normalized {
            status: CaseStatus::Error,
            message: format!("{:#}", e),
            logs: Some(format!("Trace: {}", truncate_capture(&format!("{:?}", e)))),
        },
    }
}

/// Executes cases for one run and persists their results
pub struct CaseExecutor<'a> {
    store: &'a dyn ResultStore,
    run_id: Uuid,
    case_timeout: Option<Duration>,
}

impl<'a> CaseExecutor<'a> {
    pub fn new(store: &'a dyn ResultStore, run_id: Uuid) -> Self {
        Self {
            store,
            run_id,
            case_timeout: None,
        }
    }

    /// Bound every case by `budget`. Without it a stalled case stalls the run.
    pub fn with_case_timeout(mut self, budget: Option<Duration>) -> Self {
        self.case_timeout = budget;
        self
    }

    /// Run `case` once, record its normalized result, report whether it passed.
    pub async fn execute<F, Fut>(&self, category: &str, name: &str, case: F) -> Result<bool, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<CaseOutcome>>,
    {
        let start = Instant::now();

        // Building the future runs case code too, so it sits inside the guard.
        let guarded = AssertUnwindSafe(async move { case().await }).catch_unwind();
        let raw = match self.case_timeout {
            Some(budget) => match tokio::time::timeout(budget, guarded).await {
                Ok(result) => result,
                Err(_) => Ok(Err(anyhow::anyhow!(
                    "Case exceeded time budget of {}s",
                    budget.as_secs()
                ))),
            },
            None => guarded.await,
        };

        let outcome = match raw {
            Ok(outcome) => outcome,
            Err(payload) => Err(anyhow::anyhow!(
                "Case panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        let duration = start.elapsed().as_secs_f64();
        let normalized = normalize(outcome);
        let status = normalized.status;

        self.record(category, name, status, duration, normalized.message, normalized.logs)
            .await?;
        Ok(status == CaseStatus::Pass)
    }

    /// Record a case that was not invoked.
    pub async fn skip(&self, category: &str, name: &str, reason: &str) -> Result<(), StoreError> {
        self.record(category, name, CaseStatus::Skipped, 0.0, reason.to_string(), None)
            .await
    }

    /// Record an outcome produced outside any case body (setup, system errors).
    pub async fn record(
        &self,
        category: &str,
        name: &str,
        status: CaseStatus,
        duration_seconds: f64,
        message: String,
        logs: Option<String>,
    ) -> Result<(), StoreError> {
        match status {
            CaseStatus::Pass | CaseStatus::Skipped => info!(
                run_id = %self.run_id,
                category,
                case = name,
                status = %status,
                duration_ms = (duration_seconds * 1000.0) as u64,
                "Case finished"
            ),
            CaseStatus::Fail | CaseStatus::Error => warn!(
                run_id = %self.run_id,
                category,
                case = name,
                status = %status,
                duration_ms = (duration_seconds * 1000.0) as u64,
                message = %message,
                "Case finished"
            ),
        }

        let result = CaseResult::new(
            self.run_id,
            category,
            name,
            status,
            duration_seconds,
            message,
            logs,
        );
        self.store.append_result(&result).await?;
        metrics::CASE_RESULTS.with_label_values(&[status.as_str()]).inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_common::store::MemoryStore;

    async fn only_result(store: &MemoryStore, run_id: Uuid) -> CaseResult {
        let mut results = store.results(run_id).await.unwrap();
        assert_eq!(results.len(), 1, "exactly one result per invocation");
        results.remove(0)
    }

    #[tokio::test]
    async fn test_success_is_pass() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        let passed = executor
            .execute("Discovery", "List", || async {
                Ok(CaseOutcome::pass("found 3").with_data(&vec![1, 2, 3]))
            })
            .await
            .unwrap();

        assert!(passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Pass);
        assert_eq!(result.message, "found 3");
        assert_eq!(result.logs.as_deref(), Some("Data: [1,2,3]"));
        assert!(result.duration_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_business_failure_is_fail_and_verbatim() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        let passed = executor
            .execute("VM", "Create", || async {
                Ok(CaseOutcome::fail("x").with_error("quota exceeded"))
            })
            .await
            .unwrap();

        assert!(!passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Fail);
        assert_eq!(result.message, "x");
        assert_eq!(result.logs.as_deref(), Some("Error Details: quota exceeded"));
    }

    #[tokio::test]
    async fn test_error_is_error_with_trace() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        let passed = executor
            .execute("VM", "Status", || async { Err(anyhow::anyhow!("y")) })
            .await
            .unwrap();

        assert!(!passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Error);
        assert_eq!(result.message, "y");
        assert!(result.logs.unwrap().starts_with("Trace: "));
    }

    #[tokio::test]
    async fn test_panic_is_error() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        let passed = executor
            .execute("VM", "Boom", || async {
                if true {
                    panic!("exploded");
                }
                Ok(CaseOutcome::pass(""))
            })
            .await
            .unwrap();

        assert!(!passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Error);
        assert!(result.message.contains("exploded"));
    }

    #[tokio::test]
    async fn test_panic_while_building_case_future_is_error() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        let passed = executor
            .execute("VM", "Eager", || {
                if true {
                    panic!("failed before the first poll");
                }
                std::future::ready(Ok(CaseOutcome::pass("")))
            })
            .await
            .unwrap();

        assert!(!passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Error);
        assert!(result.message.contains("failed before the first poll"));
    }

    #[tokio::test]
    async fn test_timeout_budget_records_error() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor =
            CaseExecutor::new(&store, run_id).with_case_timeout(Some(Duration::from_millis(20)));

        let passed = executor
            .execute("Node", "Stall", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(CaseOutcome::pass(""))
            })
            .await
            .unwrap();

        assert!(!passed);
        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Error);
        assert!(result.message.contains("time budget"));
    }

    #[tokio::test]
    async fn test_skip_records_reason() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);

        executor
            .skip("VM", "Create", "Destructive tests disabled.")
            .await
            .unwrap();

        let result = only_result(&store, run_id).await;
        assert_eq!(result.status, CaseStatus::Skipped);
        assert_eq!(result.duration_seconds, 0.0);
        assert!(result.message.contains("disabled"));
    }

    #[tokio::test]
    async fn test_large_payloads_are_capped() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let executor = CaseExecutor::new(&store, run_id);
        let huge = "a".repeat(10_000);

        executor
            .execute("Storage", "List", || async {
                Ok(CaseOutcome::fail("too big").with_error(huge.clone()))
            })
            .await
            .unwrap();

        let logs = only_result(&store, run_id).await.logs.unwrap();
        assert_eq!(logs.len(), "Error Details: ".len() + MAX_CAPTURE_CHARS);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(MAX_CAPTURE_CHARS + 10);
        let cut = truncate_capture(&text);
        assert_eq!(cut.chars().count(), MAX_CAPTURE_CHARS);
        assert_eq!(truncate_capture("short"), "short");
    }
}
