use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a run.
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once a run reaches one
/// of them it never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Queued | RunStatus::Running)
    }

    /// Forward-only ordering used to reject regressions.
    fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Queued => 1,
            RunStatus::Running => 2,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => 3,
        }
    }

    /// Whether `self -> next` is a legal move of the run state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Run-level verdict derived from case results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pass,
    Fail,
    Skipped,
    Error,
    Completed,
    Cancelled,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Pass => "pass",
            OverallStatus::Fail => "fail",
            OverallStatus::Skipped => "skipped",
            OverallStatus::Error => "error",
            OverallStatus::Completed => "completed",
            OverallStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single case invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
    Skipped,
    Error,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Pass => "pass",
            CaseStatus::Fail => "fail",
            CaseStatus::Skipped => "skipped",
            CaseStatus::Error => "error",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a configured suite against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub configuration_name: String,
    pub status: RunStatus,
    pub overall_status: Option<OverallStatus>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Opaque token identifying the execution unit that owns the run.
    pub cancellation_handle: Option<String>,
}

impl Run {
    /// A freshly requested run waiting in the queue.
    pub fn queued(configuration_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            configuration_name: configuration_name.into(),
            status: RunStatus::Queued,
            overall_status: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            duration_seconds: None,
            cancellation_handle: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            status: self.status,
            overall_status: self.overall_status,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Non-blocking status view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: RunStatus,
    pub overall_status: Option<OverallStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

/// Persisted outcome of one case. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub category: String,
    pub name: String,
    pub status: CaseStatus,
    pub duration_seconds: f64,
    pub message: String,
    pub logs: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CaseResult {
    pub fn new(
        run_id: Uuid,
        category: impl Into<String>,
        name: impl Into<String>,
        status: CaseStatus,
        duration_seconds: f64,
        message: impl Into<String>,
        logs: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            category: category.into(),
            name: name.into(),
            status,
            duration_seconds,
            message: message.into(),
            logs,
            created_at: Utc::now(),
        }
    }
}

/// Per-status counts over a run's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl ResultCounts {
    pub fn from_results(results: &[CaseResult]) -> Self {
        results.iter().fold(Self::default(), |mut counts, r| {
            counts.total += 1;
            match r.status {
                CaseStatus::Pass => counts.passed += 1,
                CaseStatus::Fail => counts.failed += 1,
                CaseStatus::Skipped => counts.skipped += 1,
                CaseStatus::Error => counts.errored += 1,
            }
            counts
        })
    }
}

/// Run together with its results, as served by the detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub counts: ResultCounts,
    pub results: Vec<CaseResult>,
}

impl RunDetail {
    pub fn new(run: Run, results: Vec<CaseResult>) -> Self {
        Self {
            counts: ResultCounts::from_results(&results),
            run,
            results,
        }
    }
}

/// Connection parameters for the managed target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Node every case runs against.
    pub node: String,
}

/// Sizing defaults for guests created by destructive cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestDefaults {
    #[serde(default = "default_vm_id_start")]
    pub vm_id_range_start: u32,
    #[serde(default = "default_vm_id_end")]
    pub vm_id_range_end: u32,
    #[serde(default = "default_vm_memory")]
    pub vm_memory_mb: u32,
    #[serde(default = "default_cores")]
    pub vm_cores: u32,
    #[serde(default = "default_lxc_id_start")]
    pub lxc_id_range_start: u32,
    #[serde(default = "default_lxc_id_end")]
    pub lxc_id_range_end: u32,
    #[serde(default)]
    pub lxc_template: Option<String>,
    #[serde(default = "default_lxc_memory")]
    pub lxc_memory_mb: u32,
}

impl Default for GuestDefaults {
    fn default() -> Self {
        Self {
            vm_id_range_start: default_vm_id_start(),
            vm_id_range_end: default_vm_id_end(),
            vm_memory_mb: default_vm_memory(),
            vm_cores: default_cores(),
            lxc_id_range_start: default_lxc_id_start(),
            lxc_id_range_end: default_lxc_id_end(),
            lxc_template: None,
            lxc_memory_mb: default_lxc_memory(),
        }
    }
}

/// Cases selected within one category, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySelection {
    pub category: String,
    pub cases: Vec<String>,
}

/// Everything a run needs to know about what to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub name: String,
    pub target: TargetProfile,
    #[serde(default)]
    pub guests: GuestDefaults,
    pub selected: Vec<CategorySelection>,
    #[serde(default)]
    pub destructive_enabled: bool,
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,
}

impl RunConfiguration {
    /// Selected `(category, case)` pairs, category-grouped, in configured order.
    pub fn selected_cases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.selected.iter().flat_map(|sel| {
            sel.cases
                .iter()
                .map(move |case| (sel.category.as_str(), case.as_str()))
        })
    }

    /// Reject configurations the worker could not execute as given.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.target.host.trim().is_empty() || self.target.node.trim().is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        if self.selected_cases().next().is_none() {
            return Err(ConfigError::EmptySelection);
        }
        if let Some((category, case)) = self
            .selected_cases()
            .find(|(category, case)| crate::catalog::lookup(category, case).is_none())
        {
            return Err(ConfigError::UnknownCase {
                category: category.to_string(),
                case: case.to_string(),
            });
        }
        if self.guests.vm_id_range_start > self.guests.vm_id_range_end {
            return Err(ConfigError::InvertedRange {
                kind: "vm",
                start: self.guests.vm_id_range_start,
                end: self.guests.vm_id_range_end,
            });
        }
        if self.guests.lxc_id_range_start > self.guests.lxc_id_range_end {
            return Err(ConfigError::InvertedRange {
                kind: "container",
                start: self.guests.lxc_id_range_start,
                end: self.guests.lxc_id_range_end,
            });
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    8006
}

fn default_realm() -> String {
    "pam".to_string()
}

fn default_true() -> bool {
    true
}

fn default_vm_id_start() -> u32 {
    9000
}

fn default_vm_id_end() -> u32 {
    9010
}

fn default_vm_memory() -> u32 {
    1024
}

fn default_cores() -> u32 {
    1
}

fn default_lxc_id_start() -> u32 {
    8000
}

fn default_lxc_id_end() -> u32 {
    8010
}

fn default_lxc_memory() -> u32 {
    512
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RunConfiguration {
        serde_json::from_str(
            r#"{
                "name": "nightly",
                "target": { "host": "pve.lab", "username": "root", "node": "pve1" },
                "selected": [
                    { "category": "Resource Discovery", "cases": ["List Resources"] },
                    { "category": "VM Management", "cases": ["Create VM", "Get VM Status"] }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_terminal_states_never_regress() {
        for terminal in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            for next in [
                RunStatus::Pending,
                RunStatus::Queued,
                RunStatus::Running,
                RunStatus::Completed,
                RunStatus::Failed,
                RunStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Queued));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(serde_json::to_string(&CaseStatus::Skipped).unwrap(), "\"skipped\"");
        assert_eq!(serde_json::to_string(&OverallStatus::Pass).unwrap(), "\"pass\"");
    }

    #[test]
    fn test_configuration_defaults() {
        let config = sample_config();
        assert_eq!(config.target.port, 8006);
        assert_eq!(config.target.realm, "pam");
        assert!(config.target.verify_ssl);
        assert!(!config.destructive_enabled);
        assert!(config.cleanup_enabled);
        assert_eq!(config.guests.vm_id_range_start, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selected_cases_preserve_order() {
        let config = sample_config();
        let cases: Vec<_> = config.selected_cases().collect();
        assert_eq!(
            cases,
            vec![
                ("Resource Discovery", "List Resources"),
                ("VM Management", "Create VM"),
                ("VM Management", "Get VM Status"),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_empty_selection_and_inverted_range() {
        let mut config = sample_config();
        config.selected.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptySelection));

        let mut config = sample_config();
        config.guests.vm_id_range_start = 9100;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { kind: "vm", start: 9100, .. }));
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn test_validate_rejects_unknown_case() {
        let mut config = sample_config();
        config.selected[0].cases.push("Format Disk".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownCase {
                category: "Resource Discovery".to_string(),
                case: "Format Disk".to_string(),
            })
        );
    }

    #[test]
    fn test_result_counts() {
        let run_id = Uuid::new_v4();
        let results = vec![
            CaseResult::new(run_id, "A", "one", CaseStatus::Pass, 0.1, "", None),
            CaseResult::new(run_id, "A", "two", CaseStatus::Fail, 0.1, "", None),
            CaseResult::new(run_id, "A", "three", CaseStatus::Error, 0.1, "", None),
            CaseResult::new(run_id, "A", "four", CaseStatus::Skipped, 0.0, "", None),
        ];
        let counts = ResultCounts::from_results(&results);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.errored, 1);
        assert_eq!(counts.skipped, 1);
    }
}
