/// Run Lifecycle - State Machine Transitions
///
/// Every mutation of a `Run` goes through one of the functions below, which
/// enforce the forward-only state machine:
///
/// ```text
/// pending -> queued -> running -> completed | failed
///    \________\___________\______> cancelled
/// ```
///
/// Terminal states (completed, failed, cancelled) are never left.

use crate::error::{LifecycleError, StoreError};
use crate::store::ResultStore;
use crate::types::{OverallStatus, Run, RunStatus};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Whole seconds between two instants, clamped at zero.
pub fn duration_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}

fn check_transition(run: &Run, to: RunStatus) -> Result<(), LifecycleError> {
    if run.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(LifecycleError::IllegalTransition {
            run_id: run.id,
            from: run.status,
            to,
        })
    }
}

/// queued -> running. Records the start time and the owner's cancellation handle.
pub fn begin(run: &mut Run, handle: String, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    check_transition(run, RunStatus::Running)?;
    run.status = RunStatus::Running;
    run.start_time = Some(now);
    run.cancellation_handle = Some(handle);
    Ok(())
}

/// running -> completed | failed, stamping end time and duration.
pub fn finish(
    run: &mut Run,
    status: RunStatus,
    overall_status: OverallStatus,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    check_transition(run, status)?;
    run.status = status;
    run.overall_status = Some(overall_status);
    stamp_end(run, now);
    Ok(())
}

/// Any cancellable state -> cancelled.
pub fn cancel_in_place(run: &mut Run, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if !run.status.is_cancellable() {
        return Err(LifecycleError::NotCancellable {
            run_id: run.id,
            status: run.status,
        });
    }
    run.status = RunStatus::Cancelled;
    run.overall_status = Some(OverallStatus::Cancelled);
    stamp_end(run, now);
    Ok(())
}

fn stamp_end(run: &mut Run, now: DateTime<Utc>) {
    let end = *run.end_time.get_or_insert(now);
    // A run cancelled before it started has no elapsed time.
    run.duration_seconds = Some(match run.start_time {
        Some(start) => duration_seconds(start, end),
        None => 0,
    });
}

/// Cancel a run.
///
/// Only pending, queued and running runs are cancellable; any other state is
/// rejected with [`LifecycleError::NotCancellable`] and the run is left as is.
/// After the state change the owning execution unit is notified through the
/// store's cancellation signal. Notification is best-effort: the run is
/// already cancelled when it is attempted.
pub async fn cancel(store: &dyn ResultStore, run_id: Uuid) -> Result<Run, StoreError> {
    let run = store
        .update_run(run_id, Box::new(|run: &mut Run| cancel_in_place(run, Utc::now())))
        .await?;

    info!(
        run_id = %run_id,
        handle = run.cancellation_handle.as_deref().unwrap_or("-"),
        duration_seconds = run.duration_seconds,
        "Run cancelled"
    );

    if let Err(e) = store.signal_cancel(run_id).await {
        warn!(run_id = %run_id, error = %e, "Failed to signal cancellation to execution unit");
    }

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn run_with(status: RunStatus) -> Run {
        let mut run = Run::queued("cfg");
        run.status = status;
        run
    }

    #[test]
    fn test_begin_records_start_and_handle() {
        let mut run = run_with(RunStatus::Queued);
        let now = Utc::now();
        begin(&mut run, "worker-1/task-7".to_string(), now).unwrap();

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.start_time, Some(now));
        assert_eq!(run.cancellation_handle.as_deref(), Some("worker-1/task-7"));
    }

    #[test]
    fn test_begin_rejects_terminal_run() {
        let mut run = run_with(RunStatus::Completed);
        let err = begin(&mut run, "h".to_string(), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_finish_computes_duration() {
        let mut run = run_with(RunStatus::Queued);
        let start = Utc::now();
        begin(&mut run, "h".to_string(), start).unwrap();
        finish(&mut run, RunStatus::Completed, OverallStatus::Pass, start + Duration::seconds(42)).unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.overall_status, Some(OverallStatus::Pass));
        assert_eq!(run.duration_seconds, Some(42));
    }

    #[test]
    fn test_duration_never_negative() {
        let now = Utc::now();
        assert_eq!(duration_seconds(now, now - Duration::seconds(5)), 0);
    }

    #[test]
    fn test_cancel_keeps_existing_end_time() {
        let mut run = run_with(RunStatus::Running);
        let start = Utc::now() - Duration::seconds(30);
        let end = start + Duration::seconds(10);
        run.start_time = Some(start);
        run.end_time = Some(end);

        cancel_in_place(&mut run, Utc::now()).unwrap();
        assert_eq!(run.end_time, Some(end));
        assert_eq!(run.duration_seconds, Some(10));
    }

    #[test]
    fn test_cancel_before_start_has_zero_duration() {
        let mut run = run_with(RunStatus::Pending);
        cancel_in_place(&mut run, Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.duration_seconds, Some(0));
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_cancel_running_run() {
        let store = MemoryStore::new();
        let mut run = run_with(RunStatus::Queued);
        begin(&mut run, "h".to_string(), Utc::now()).unwrap();
        store.create_run(&run).await.unwrap();

        let cancelled = cancel(&store, run.id).await.unwrap();

        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(cancelled.overall_status, Some(OverallStatus::Cancelled));
        assert!(cancelled.end_time.is_some());
        assert!(cancelled.duration_seconds.unwrap() >= 0);
        assert!(store.is_cancel_signalled(run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_terminal_run_is_rejected_without_mutation() {
        let store = MemoryStore::new();
        let mut run = run_with(RunStatus::Completed);
        run.overall_status = Some(OverallStatus::Pass);
        store.create_run(&run).await.unwrap();

        let err = cancel(&store, run.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::NotCancellable { .. })
        ));

        let stored = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored, run);
        assert!(!store.is_cancel_signalled(run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let store = MemoryStore::new();
        let err = cancel(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
