use crate::types::RunStatus;
use thiserror::Error;
use uuid::Uuid;

/// Violations of the run state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("run {run_id} cannot move from '{from}' to '{to}'")]
    IllegalTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("cannot cancel run {run_id} in '{status}' state")]
    NotCancellable { run_id: Uuid, status: RunStatus },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("configuration for run {0} not found")]
    ConfigurationNotFound(Uuid),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("run {run_id} kept changing underneath an update ({attempts} attempts)")]
    UpdateConflict { run_id: Uuid, attempts: u32 },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::RunNotFound(_) | StoreError::ConfigurationNotFound(_)
        )
    }
}

/// Rejected process settings or run configurations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("configuration name cannot be empty")]
    EmptyName,

    #[error("target host and node are required")]
    MissingTarget,

    #[error("no cases selected")]
    EmptySelection,

    #[error("unknown case '{case}' in category '{category}'")]
    UnknownCase { category: String, case: String },

    #[error("{kind} id range is inverted: {start}..{end}")]
    InvertedRange {
        kind: &'static str,
        start: u32,
        end: u32,
    },
}
