/// Run Coordinator - Owns One Run from Pickup to Terminal State
///
/// **Sequence:**
/// 1. Load the run; terminal or cancel-flagged runs are finalized as cancelled
/// 2. queued → running, with start time and cancellation handle
/// 3. Connect to the target; on failure record one "Setup" error and finalize
/// 4. Execute the selected cases in configured order, skipping destructive
///    ones when they are disabled
/// 5. Cleanup, when both destructive and cleanup are enabled
/// 6. Aggregate the verdict and write the terminal state
///
/// **Cancellation:**
/// Checked at every case boundary. A cancelled run stops before its next case,
/// still tears down what it created, and keeps the cancelled state the
/// cancellation path wrote.
///
/// **Faults:**
/// Anything escaping steps 3–5 (store failures, a panic outside a case body)
/// is recorded as a single "System Error" result and the run is forced to
/// failed / error. The end time is always written, so a run is never left
/// running.
///
/// Store, configuration source and target adapter are injected; the
/// coordinator holds no global state.

use crate::aggregator::aggregate;
use crate::cases::{self, SuiteContext};
use crate::cleanup;
use crate::executor::{panic_message, truncate_capture, CaseExecutor};
use crate::metrics;
use crate::target::TargetAdapter;
use chrono::Utc;
use futures_util::FutureExt;
use sentinel_common::catalog;
use sentinel_common::error::StoreError;
use sentinel_common::lifecycle;
use sentinel_common::store::{ConfigurationSource, ResultStore};
use sentinel_common::types::{CaseStatus, OverallStatus, Run, RunStatus};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const SETUP_CATEGORY: &str = "Setup";
pub const SYSTEM_ERROR_CATEGORY: &str = "Run Execution";
pub const DESTRUCTIVE_DISABLED: &str = "Destructive tests disabled.";

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("orchestration panicked: {0}")]
    Panicked(String),
}

/// How the suite phase ended, when it did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuiteEnd {
    Completed,
    ConnectionFailed,
    Cancelled,
}

/// Decrements the in-flight gauge however the run ends.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::RUNS_IN_FLIGHT.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::RUNS_IN_FLIGHT.dec();
    }
}

pub struct Coordinator {
    store: Arc<dyn ResultStore>,
    configurations: Arc<dyn ConfigurationSource>,
    adapter: Arc<dyn TargetAdapter>,
    worker_id: String,
    case_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ResultStore>,
        configurations: Arc<dyn ConfigurationSource>,
        adapter: Arc<dyn TargetAdapter>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            configurations,
            adapter,
            worker_id: worker_id.into(),
            case_timeout: None,
        }
    }

    pub fn with_case_timeout(mut self, budget: Option<Duration>) -> Self {
        self.case_timeout = budget;
        self
    }

    /// Spawn `run` on its own task. Case-level failures never surface here;
    /// only orchestration errors are logged.
    pub fn start(self: &Arc<Self>, run_id: Uuid) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.run(run_id).await {
                error!(run_id = %run_id, error = %e, "Run orchestration failed");
            }
        })
    }

    /// Drive one run to a terminal state and return it as stored.
    #[instrument(skip(self), fields(worker = %self.worker_id))]
    pub async fn run(&self, run_id: Uuid) -> Result<Run, OrchestrationError> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound(run_id))?;

        if run.status.is_terminal() {
            info!(run_id = %run_id, status = %run.status, "Run already terminal, nothing to do");
            return Ok(run);
        }
        if self.store.is_cancel_signalled(run_id).await? {
            info!(run_id = %run_id, "Run cancelled before pickup");
            return self.finalize_cancelled(run_id).await;
        }

        let handle = format!("{}/{}", self.worker_id, run_id);
        let begun = self
            .store
            .update_run(
                run_id,
                Box::new(move |run: &mut Run| lifecycle::begin(run, handle.clone(), Utc::now())),
            )
            .await;
        let run = match begun {
            Ok(run) => run,
            // Cancelled between the signal check and pickup
            Err(StoreError::Lifecycle(e)) => {
                info!(run_id = %run_id, reason = %e, "Run left runnable state before pickup");
                return self.reload(run_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        metrics::RUNS_STARTED.inc();
        let _in_flight = InFlight::enter();
        info!(
            run_id = %run_id,
            configuration = %run.configuration_name,
            handle = run.cancellation_handle.as_deref().unwrap_or("-"),
            "Run started"
        );

        let suite = AssertUnwindSafe(self.execute_suite(run_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(OrchestrationError::Panicked(panic_message(payload.as_ref())))
            });

        let verdict = match suite {
            Ok(SuiteEnd::Cancelled) => {
                info!(run_id = %run_id, "Run cancelled, stopped at case boundary");
                // The signal may arrive before the cancelled state is visible,
                // so write it here as well.
                return self.finalize_cancelled(run_id).await;
            }
            Ok(end) => match self.store.results(run_id).await {
                Ok(results) => {
                    let status = if end == SuiteEnd::ConnectionFailed {
                        RunStatus::Failed
                    } else {
                        RunStatus::Completed
                    };
                    Ok((status, aggregate(&results)))
                }
                Err(e) => Err(OrchestrationError::from(e)),
            },
            Err(e) => Err(e),
        };

        let (status, overall_status) = match verdict {
            Ok(verdict) => verdict,
            Err(fault) => {
                error!(run_id = %run_id, error = %fault, "Run faulted");
                self.record_system_error(run_id, &fault).await;
                (RunStatus::Failed, OverallStatus::Error)
            }
        };

        self.finalize(run_id, status, overall_status).await
    }

    /// Steps 3–5: connect, execute cases, clean up.
    async fn execute_suite(&self, run_id: Uuid) -> Result<SuiteEnd, OrchestrationError> {
        let configuration = self.configurations.resolve(run_id).await?;
        let executor =
            CaseExecutor::new(self.store.as_ref(), run_id).with_case_timeout(self.case_timeout);

        let session = match self.adapter.connect(&configuration.target).await {
            Ok(session) => session,
            Err(e) => {
                executor
                    .record(
                        SETUP_CATEGORY,
                        "Target Connection",
                        CaseStatus::Error,
                        0.0,
                        format!("Failed to connect to target: {}", e),
                        None,
                    )
                    .await?;
                return Ok(SuiteEnd::ConnectionFailed);
            }
        };

        let mut ctx = SuiteContext::new(
            session.as_ref(),
            &configuration.target.node,
            &configuration.guests,
        );
        let mut end = SuiteEnd::Completed;

        for (category, name) in configuration.selected_cases() {
            if self.cancel_requested(run_id).await {
                end = SuiteEnd::Cancelled;
                break;
            }

            let destructive = catalog::lookup(category, name).map_or(false, |c| c.destructive);
            if destructive && !configuration.destructive_enabled {
                executor.skip(category, name, DESTRUCTIVE_DISABLED).await?;
                continue;
            }

            executor
                .execute(category, name, || cases::run_case(&mut ctx, category, name))
                .await?;
        }

        if configuration.cleanup_enabled && configuration.destructive_enabled {
            cleanup::cleanup(&executor, session.as_ref(), &mut ctx.registry).await?;
        } else if !ctx.registry.is_empty() {
            warn!(
                run_id = %run_id,
                resources = ctx.registry.len(),
                "Cleanup disabled, leaving created resources in place"
            );
        }

        Ok(end)
    }

    /// A failed check counts as "not cancelled" so a flaky store cannot
    /// abort a healthy run.
    async fn cancel_requested(&self, run_id: Uuid) -> bool {
        match self.store.is_cancel_signalled(run_id).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to check cancellation signal");
                return false;
            }
        }
        match self.store.load_run(run_id).await {
            Ok(Some(run)) => run.status == RunStatus::Cancelled,
            Ok(None) => false,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to reload run status");
                false
            }
        }
    }

    async fn record_system_error(&self, run_id: Uuid, fault: &OrchestrationError) {
        let executor = CaseExecutor::new(self.store.as_ref(), run_id);
        let recorded = executor
            .record(
                SYSTEM_ERROR_CATEGORY,
                "System Error",
                CaseStatus::Error,
                0.0,
                format!("Run failed: {}", fault),
                Some(format!("Trace: {}", truncate_capture(&format!("{:?}", fault)))),
            )
            .await;
        if let Err(e) = recorded {
            error!(run_id = %run_id, error = %e, "Failed to record system error");
        }
    }

    /// Write the terminal state. A run cancelled meanwhile keeps its state.
    async fn finalize(
        &self,
        run_id: Uuid,
        status: RunStatus,
        overall_status: OverallStatus,
    ) -> Result<Run, OrchestrationError> {
        let finished = self
            .store
            .update_run(
                run_id,
                Box::new(move |run: &mut Run| lifecycle::finish(run, status, overall_status, Utc::now())),
            )
            .await;

        match finished {
            Ok(run) => {
                count_finished(&run);
                info!(
                    run_id = %run_id,
                    status = %run.status,
                    overall_status = %overall_status,
                    duration_seconds = run.duration_seconds,
                    "Run finished"
                );
                Ok(run)
            }
            Err(StoreError::Lifecycle(e)) => {
                warn!(run_id = %run_id, error = %e, "Run changed state while finishing, keeping it");
                let run = self.reload(run_id).await?;
                count_finished(&run);
                Ok(run)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the cancelled state unless the run is already terminal.
    async fn finalize_cancelled(&self, run_id: Uuid) -> Result<Run, OrchestrationError> {
        let run = match self
            .store
            .update_run(
                run_id,
                Box::new(|run: &mut Run| lifecycle::cancel_in_place(run, Utc::now())),
            )
            .await
        {
            Ok(run) => run,
            Err(StoreError::Lifecycle(_)) => self.reload(run_id).await?,
            Err(e) => return Err(e.into()),
        };
        count_finished(&run);
        Ok(run)
    }

    async fn reload(&self, run_id: Uuid) -> Result<Run, OrchestrationError> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound(run_id))
    }
}

fn count_finished(run: &Run) {
    if let Some(overall_status) = run.overall_status {
        metrics::RUNS_FINISHED
            .with_label_values(&[overall_status.to_string().as_str()])
            .inc();
    }
}
