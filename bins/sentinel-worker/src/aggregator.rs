/// Status Aggregator - Run Verdict from Case Results
///
/// **Core Responsibility:**
/// Derive one `OverallStatus` for a run from its persisted case results.
///
/// **Critical Properties:**
/// - Knows nothing about the target, the store or the coordinator
/// - Pure function: case results → verdict
///
/// **Precedence (first match wins):**
/// 1. Any `fail` or `error` result          → `Fail` (one failure taints the run)
/// 2. At least one result, all `skipped`    → `Skipped`
/// 3. At least one `pass`                   → `Pass`
/// 4. Anything else (no results at all)     → `Completed`

use sentinel_common::types::{CaseResult, CaseStatus, OverallStatus};

pub fn aggregate(results: &[CaseResult]) -> OverallStatus {
    let any_failure = results
        .iter()
        .any(|r| matches!(r.status, CaseStatus::Fail | CaseStatus::Error));
    if any_failure {
        return OverallStatus::Fail;
    }

    if !results.is_empty() && results.iter().all(|r| r.status == CaseStatus::Skipped) {
        return OverallStatus::Skipped;
    }

    if results.iter().any(|r| r.status == CaseStatus::Pass) {
        return OverallStatus::Pass;
    }

    OverallStatus::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn results(statuses: &[CaseStatus]) -> Vec<CaseResult> {
        let run_id = Uuid::new_v4();
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                CaseResult::new(run_id, "Cat", format!("case-{}", i), *status, 0.0, "", None)
            })
            .collect()
    }

    #[test]
    fn test_failure_taints_passes() {
        let verdict = aggregate(&results(&[CaseStatus::Pass, CaseStatus::Fail, CaseStatus::Pass]));
        assert_eq!(verdict, OverallStatus::Fail);
    }

    #[test]
    fn test_error_counts_as_failure() {
        let verdict = aggregate(&results(&[CaseStatus::Pass, CaseStatus::Error]));
        assert_eq!(verdict, OverallStatus::Fail);
    }

    #[test]
    fn test_failure_beats_all_skipped() {
        let verdict = aggregate(&results(&[CaseStatus::Skipped, CaseStatus::Error]));
        assert_eq!(verdict, OverallStatus::Fail);
    }

    #[test]
    fn test_all_skipped() {
        let verdict = aggregate(&results(&[CaseStatus::Skipped, CaseStatus::Skipped]));
        assert_eq!(verdict, OverallStatus::Skipped);
    }

    #[test]
    fn test_pass_with_some_skipped() {
        let verdict = aggregate(&results(&[CaseStatus::Skipped, CaseStatus::Pass]));
        assert_eq!(verdict, OverallStatus::Pass);
    }

    #[test]
    fn test_single_pass() {
        assert_eq!(aggregate(&results(&[CaseStatus::Pass])), OverallStatus::Pass);
    }

    #[test]
    fn test_no_results_is_completed() {
        assert_eq!(aggregate(&[]), OverallStatus::Completed);
    }
}
