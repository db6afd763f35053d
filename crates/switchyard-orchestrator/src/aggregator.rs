use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use switchyard_core::{FailureKind, TaskOutcome};

/// Overall status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every stage succeeded.
    Complete,
    /// Only optional stages (or the stages skipped because of them) did not succeed.
    Partial,
    /// A required stage failed or was rejected by its circuit breaker.
    Failed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Complete => write!(f, "complete"),
            WorkflowStatus::Partial => write!(f, "partial"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Raw outcome of one stage, as produced by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Agent that ran the stage (or the unresolved target).
    pub agent_id: String,
    /// Whether failure fails the workflow.
    pub required: bool,
    /// Outcome of the stage.
    pub outcome: TaskOutcome,
}

impl StageRecord {
    /// Record a stage outcome.
    pub fn new(
        stage: impl Into<String>,
        agent_id: impl Into<String>,
        required: bool,
        outcome: TaskOutcome,
    ) -> Self {
        Self {
            stage: stage.into(),
            agent_id: agent_id.into(),
            required,
            outcome,
        }
    }

    /// Whether this record, on its own, fails the workflow.
    fn is_fatal(&self) -> bool {
        if !self.required {
            return false;
        }
        match &self.outcome {
            TaskOutcome::Success { .. } => false,
            TaskOutcome::CircuitOpen => true,
            TaskOutcome::Failure { kind, .. } => *kind != FailureKind::UpstreamFailed,
        }
    }
}

/// Per-stage entry of a [`WorkflowResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Agent that ran the stage.
    pub agent_id: String,
    /// Whether the stage was required.
    pub required: bool,
    /// Outcome of the stage.
    pub outcome: TaskOutcome,
}

/// Final, immutable result of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Overall status.
    pub status: WorkflowStatus,
    /// Keyed by stage name.
    pub stages: BTreeMap<String, StageReport>,
}

impl WorkflowResult {
    /// Whether every stage succeeded.
    pub fn is_complete(&self) -> bool {
        self.status == WorkflowStatus::Complete
    }

    /// Outcome of `stage`, if it exists.
    pub fn outcome(&self, stage: &str) -> Option<&TaskOutcome> {
        self.stages.get(stage).map(|report| &report.outcome)
    }

    /// Outcomes keyed by agent id. When one agent served several stages, the
    /// first non-success in stage-name order wins, otherwise the first
    /// success.
    pub fn per_agent(&self) -> BTreeMap<&str, &TaskOutcome> {
        let mut map: BTreeMap<&str, &TaskOutcome> = BTreeMap::new();
        for report in self.stages.values() {
            map.entry(report.agent_id.as_str())
                .and_modify(|current| {
                    if current.is_success() && !report.outcome.is_success() {
                        *current = &report.outcome;
                    }
                })
                .or_insert(&report.outcome);
        }
        map
    }

    /// Results of the stages that succeeded.
    pub fn outputs(&self) -> BTreeMap<&str, &serde_json::Value> {
        self.stages
            .iter()
            .filter_map(|(name, report)| report.outcome.result().map(|r| (name.as_str(), r)))
            .collect()
    }

    /// Stages that did not succeed.
    pub fn failures(&self) -> BTreeMap<&str, &TaskOutcome> {
        self.stages
            .iter()
            .filter(|(_, report)| !report.outcome.is_success())
            .map(|(name, report)| (name.as_str(), &report.outcome))
            .collect()
    }

    /// Combine the results of two independent branches.
    pub fn merge(self, other: WorkflowResult) -> WorkflowResult {
        aggregate(self.into_records().chain(other.into_records()))
    }

    fn into_records(self) -> impl Iterator<Item = StageRecord> {
        self.stages.into_iter().map(|(stage, report)| StageRecord {
            stage,
            agent_id: report.agent_id,
            required: report.required,
            outcome: report.outcome,
        })
    }
}

/// Fold stage records into a workflow result.
///
/// The status depends only on the set of records, never on their order.
/// A later record for an already-seen stage name replaces the earlier one.
pub fn aggregate(records: impl IntoIterator<Item = StageRecord>) -> WorkflowResult {
    let mut stages = BTreeMap::new();
    for record in records {
        stages.insert(record.stage.clone(), record);
    }

    let status = if stages.values().any(StageRecord::is_fatal) {
        WorkflowStatus::Failed
    } else if stages.values().all(|r| r.outcome.is_success()) {
        WorkflowStatus::Complete
    } else {
        WorkflowStatus::Partial
    };

    let stages = stages
        .into_iter()
        .map(|(name, record)| {
            (
                name,
                StageReport {
                    agent_id: record.agent_id,
                    required: record.required,
                    outcome: record.outcome,
                },
            )
        })
        .collect();

    WorkflowResult { status, stages }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ok(stage: &str, required: bool) -> StageRecord {
        StageRecord::new(
            stage,
            stage,
            required,
            TaskOutcome::success(json!(stage), Duration::from_millis(5)),
        )
    }

    fn failed(stage: &str, required: bool, kind: FailureKind) -> StageRecord {
        StageRecord::new(stage, stage, required, TaskOutcome::failure(kind, "boom"))
    }

    #[test]
    fn test_all_success_is_complete() {
        let result = aggregate([ok("a", true), ok("b", false)]);
        assert_eq!(result.status, WorkflowStatus::Complete);
        assert!(result.is_complete());
        assert_eq!(result.outputs().len(), 2);
        assert!(result.failures().is_empty());
    }

    #[test]
    fn test_optional_failure_is_partial() {
        let result = aggregate([
            ok("a", true),
            failed("b", false, FailureKind::Timeout),
            failed("c", true, FailureKind::UpstreamFailed),
        ]);
        assert_eq!(result.status, WorkflowStatus::Partial);
        assert_eq!(result.outputs().keys().copied().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(result.failures().len(), 2);
    }

    #[test]
    fn test_required_failure_is_failed() {
        let result = aggregate([ok("a", false), failed("b", true, FailureKind::AgentError)]);
        assert_eq!(result.status, WorkflowStatus::Failed);

        let unavailable = aggregate([failed("a", true, FailureKind::AgentUnavailable)]);
        assert_eq!(unavailable.status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_required_circuit_open_is_failed() {
        let result = aggregate([
            ok("a", true),
            StageRecord::new("b", "b", true, TaskOutcome::CircuitOpen),
        ]);
        assert_eq!(result.status, WorkflowStatus::Failed);

        let optional = aggregate([
            ok("a", true),
            StageRecord::new("b", "b", false, TaskOutcome::CircuitOpen),
        ]);
        assert_eq!(optional.status, WorkflowStatus::Partial);
    }

    #[test]
    fn test_order_independent() {
        let records = vec![
            ok("a", true),
            failed("b", false, FailureKind::ConnectionRefused),
            ok("c", false),
            failed("d", true, FailureKind::UpstreamFailed),
        ];
        let forward = aggregate(records.clone());
        let backward = aggregate(records.into_iter().rev());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_merge_matches_single_aggregation() {
        let left = vec![ok("a", true), failed("b", false, FailureKind::Timeout)];
        let right = vec![ok("c", true), ok("d", false)];

        let whole = aggregate(left.iter().cloned().chain(right.iter().cloned()));
        let merged = aggregate(left.clone()).merge(aggregate(right.clone()));
        let swapped = aggregate(right).merge(aggregate(left));

        assert_eq!(whole, merged);
        assert_eq!(merged, swapped);
        assert_eq!(whole.status, WorkflowStatus::Partial);
    }

    #[test]
    fn test_per_agent_prefers_failure() {
        let result = aggregate([
            StageRecord::new("first", "w", true, TaskOutcome::success(json!(1), Duration::ZERO)),
            StageRecord::new("second", "w", false, TaskOutcome::CircuitOpen),
            ok("other", true),
        ]);
        let per_agent = result.per_agent();
        assert_eq!(per_agent.len(), 2);
        assert_eq!(per_agent["w"], &TaskOutcome::CircuitOpen);
        assert!(per_agent["other"].is_success());
    }

    #[test]
    fn test_result_serializes() {
        let result = aggregate([ok("a", true), failed("b", false, FailureKind::Timeout)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "partial");
        assert_eq!(json["stages"]["a"]["outcome"]["status"], "success");
        assert_eq!(json["stages"]["b"]["outcome"]["kind"], "timeout");
    }
}
