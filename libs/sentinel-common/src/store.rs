//! Persistence seams for runs, case results and run configurations.
//!
//! The orchestration engine only ever talks to these traits. Production
//! wiring uses [`crate::redis::RedisStore`]; tests and single-process setups
//! use [`MemoryStore`].

use crate::error::{LifecycleError, StoreError};
use crate::types::{CaseResult, Run, RunConfiguration};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Mutation applied to a stored run. Returning an error leaves the run untouched.
///
/// Stores that detect a concurrent write re-apply the mutation to the fresh
/// copy, so it may run more than once and must not consume its captures.
pub type RunMutation = Box<dyn Fn(&mut Run) -> Result<(), LifecycleError> + Send + Sync>;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Load, mutate and write back a run as one compare-and-set; returns the
    /// stored value. The mutation always sees the latest stored state.
    async fn update_run(&self, run_id: Uuid, mutation: RunMutation) -> Result<Run, StoreError>;

    /// Append one case result. Results are returned in append order.
    async fn append_result(&self, result: &CaseResult) -> Result<(), StoreError>;

    async fn results(&self, run_id: Uuid) -> Result<Vec<CaseResult>, StoreError>;

    /// Raise the cancellation signal the owning execution unit polls.
    async fn signal_cancel(&self, run_id: Uuid) -> Result<(), StoreError>;

    async fn is_cancel_signalled(&self, run_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn resolve(&self, run_id: Uuid) -> Result<RunConfiguration, StoreError>;
}

/// Entry point of the trigger surface: persist a queued run and hand it to workers.
#[async_trait]
pub trait RunSubmitter: Send + Sync {
    async fn submit(&self, run: &Run, configuration: &RunConfiguration) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<Uuid, Run>,
    results: HashMap<Uuid, Vec<CaseResult>>,
    configurations: HashMap<Uuid, RunConfiguration>,
    cancel_signals: HashSet<Uuid>,
    queue: Vec<Uuid>,
}

/// Process-local store. Every operation holds one lock, so updates are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_configuration(&self, run_id: Uuid, configuration: RunConfiguration) {
        self.state
            .write()
            .await
            .configurations
            .insert(run_id, configuration);
    }

    /// Run ids submitted so far, in submission order.
    pub async fn queued(&self) -> Vec<Uuid> {
        self.state.read().await.queue.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.state.read().await.runs.get(&run_id).cloned())
    }

    async fn update_run(&self, run_id: Uuid, mutation: RunMutation) -> Result<Run, StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        let mut next = stored.clone();
        mutation(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn append_result(&self, result: &CaseResult) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .results
            .entry(result.run_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn results(&self, run_id: Uuid) -> Result<Vec<CaseResult>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .results
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn signal_cancel(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.state.write().await.cancel_signals.insert(run_id);
        Ok(())
    }

    async fn is_cancel_signalled(&self, run_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.read().await.cancel_signals.contains(&run_id))
    }
}

#[async_trait]
impl ConfigurationSource for MemoryStore {
    async fn resolve(&self, run_id: Uuid) -> Result<RunConfiguration, StoreError> {
        self.state
            .read()
            .await
            .configurations
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::ConfigurationNotFound(run_id))
    }
}

#[async_trait]
impl RunSubmitter for MemoryStore {
    async fn submit(&self, run: &Run, configuration: &RunConfiguration) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.configurations.insert(run.id, configuration.clone());
        state.runs.insert(run.id, run.clone());
        state.queue.push(run.id);
        Ok(())
    }
}
