use crate::aggregator::{aggregate, StageRecord, WorkflowResult};
use crate::plan::{Stage, Target, WorkflowPlan};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard_channel::CommunicationChannel;
use switchyard_core::{
    AgentCard, AgentSettings, FailureKind, SettingsProvider, SwitchyardResult, Task, TaskOutcome,
};
use switchyard_registry::AgentRegistry;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const WORKFLOW_DEADLINE_EXCEEDED: &str = "workflow deadline exceeded";

/// Runs workflow plans: resolves each stage's agent, feeds it its payload,
/// calls it through the channel, and aggregates the outcomes.
pub struct TaskDispatcher {
    registry: Arc<AgentRegistry>,
    channel: Arc<CommunicationChannel>,
    settings: Arc<dyn SettingsProvider>,
}

impl TaskDispatcher {
    /// Create a dispatcher over a registry and a channel.
    pub fn new(
        registry: Arc<AgentRegistry>,
        channel: Arc<CommunicationChannel>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            registry,
            channel,
            settings,
        }
    }

    /// Execute `plan` step by step.
    ///
    /// Only an invalid plan is an error. Every stage, attempted or not, ends
    /// up with exactly one outcome in the returned result.
    pub async fn dispatch(&self, plan: &WorkflowPlan) -> SwitchyardResult<WorkflowResult> {
        plan.validate()?;

        let workflow_id = Uuid::new_v4();
        let deadline = plan.deadline().map(|d| Instant::now() + d);
        info!(
            workflow_id = %workflow_id,
            name = plan.name.as_deref().unwrap_or("unnamed"),
            steps = plan.steps.len(),
            "Dispatching workflow"
        );

        let mut done: HashMap<String, StageRecord> = HashMap::new();
        for (index, step) in plan.steps.iter().enumerate() {
            let runs = step
                .stages
                .iter()
                .map(|stage| self.run_stage(stage, &done, deadline));
            let records = join_all(runs).await;

            for record in records {
                done.insert(record.stage.clone(), record);
            }
            info!(workflow_id = %workflow_id, step = index, stages = step.stages.len(), "Step finished");
        }

        let result = aggregate(done.into_values());
        info!(workflow_id = %workflow_id, status = %result.status, "Workflow finished");
        Ok(result)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        done: &HashMap<String, StageRecord>,
        deadline: Option<Instant>,
    ) -> StageRecord {
        let name = stage.name();
        let label = match stage.target() {
            Target::Agent(id) | Target::Skill(id) => id,
        };
        let record = |agent_id: &str, outcome| StageRecord::new(name, agent_id, stage.required, outcome);

        let blocked: Vec<&str> = stage
            .depends_on
            .iter()
            .filter(|dep| !done.get(dep.as_str()).is_some_and(|r| r.outcome.is_success()))
            .map(String::as_str)
            .collect();
        if !blocked.is_empty() {
            info!(stage = name, blocked_by = ?blocked, "Skipping stage, upstream did not succeed");
            return record(
                label,
                TaskOutcome::failure(
                    FailureKind::UpstreamFailed,
                    format!("upstream stage(s) did not succeed: {}", blocked.join(", ")),
                ),
            );
        }

        let workflow_left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if workflow_left == Some(Duration::ZERO) {
            return record(
                label,
                TaskOutcome::failure(FailureKind::Timeout, WORKFLOW_DEADLINE_EXCEEDED),
            );
        }

        let card = match self.resolve(stage.target()) {
            Ok(card) => card,
            Err(e) => {
                warn!(stage = name, target = label, error = %e, "Stage target unavailable");
                return record(
                    label,
                    TaskOutcome::failure(FailureKind::AgentUnavailable, e.to_string()),
                );
            }
        };

        let payload = stage_payload(stage, done);
        let settings = self.settings.settings_for(&card.id);
        let mut budget = stage.timeout().unwrap_or_else(|| default_budget(&settings));
        if let Some(left) = workflow_left {
            budget = budget.min(left);
        }
        let task = Task::new(card.id.clone(), payload, budget);
        info!(stage = name, agent_id = %card.id, task_id = %task.task_id, budget_ms = budget.as_millis() as u64, "Dispatching stage");

        let call = self.channel.call(&card, &task);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .unwrap_or_else(|_| {
                    warn!(stage = name, agent_id = %card.id, "Workflow deadline hit, call abandoned");
                    TaskOutcome::failure(FailureKind::Timeout, WORKFLOW_DEADLINE_EXCEEDED)
                }),
            None => call.await,
        };
        record(&card.id, outcome)
    }

    fn resolve(&self, target: Target<'_>) -> SwitchyardResult<AgentCard> {
        match target {
            Target::Agent(id) => self.registry.resolve(id),
            Target::Skill(skill) => self.registry.resolve_skill(skill),
        }
    }
}

/// The stage's static payload, or else its upstream outputs: one dependency
/// passes its result through, several are keyed by stage name.
fn stage_payload(stage: &Stage, done: &HashMap<String, StageRecord>) -> serde_json::Value {
    if let Some(payload) = &stage.payload {
        return payload.clone();
    }
    let output = |dep: &str| {
        done.get(dep)
            .and_then(|r| r.outcome.result())
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    };
    match stage.depends_on.as_slice() {
        [] => serde_json::Value::Null,
        [only] => output(only),
        deps => serde_json::Value::Object(
            deps.iter()
                .map(|dep| (dep.clone(), output(dep)))
                .collect(),
        ),
    }
}

/// Enough time for every attempt plus the longest backoff between them.
fn default_budget(settings: &AgentSettings) -> Duration {
    let attempts = settings.max_retries.saturating_add(1);
    settings
        .timeout()
        .saturating_mul(attempts)
        .saturating_add(settings.max_delay().saturating_mul(settings.max_retries))
}
