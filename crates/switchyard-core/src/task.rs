use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// A single unit of work addressed to one agent.
///
/// The `task_id` is generated by the caller and reused on every retry so a
/// worker can correlate duplicate deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-generated id, reused across retries.
    pub task_id: Uuid,
    /// Agent the task is addressed to.
    pub target_agent_id: String,
    /// Opaque input for the agent.
    pub payload: serde_json::Value,
    /// Absolute time after which the result is useless.
    pub deadline: DateTime<Utc>,
}

impl Task {
    /// Create a task that must complete within `budget` from now.
    pub fn new(
        target_agent_id: impl Into<String>,
        payload: serde_json::Value,
        budget: Duration,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            target_agent_id: target_agent_id.into(),
            payload,
            deadline: deadline_after(budget),
        }
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// The wire form sent to the worker.
    pub fn to_request(&self) -> TaskRequest {
        TaskRequest {
            task_id: self.task_id,
            payload: self.payload.clone(),
            deadline: self.deadline,
        }
    }
}

/// Absolute deadline `budget` from now, saturating for absurd budgets.
pub fn deadline_after(budget: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(budget).unwrap_or_else(|_| chrono::Duration::days(365));
    Utc::now() + delta
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Id the worker must echo back.
    pub task_id: Uuid,
    /// Opaque input.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Absolute deadline (RFC 3339 on the wire).
    pub deadline: DateTime<Utc>,
}

/// Fault kind a worker reports when a task cannot finish before its deadline.
pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

/// Structured error reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFault {
    /// Machine-readable kind chosen by the worker.
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl AgentFault {
    /// Create a fault of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The failure kind this fault stands for on the calling side.
    pub fn failure_kind(&self) -> FailureKind {
        if self.kind == DEADLINE_EXCEEDED {
            FailureKind::Timeout
        } else {
            FailureKind::AgentError
        }
    }
}

/// Response body of `POST /tasks`. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Id of the task being answered.
    pub task_id: Uuid,
    /// Output of a successful task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Set when the worker failed the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentFault>,
}

impl TaskResponse {
    /// Successful reply.
    pub fn ok(task_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            task_id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply.
    pub fn err(task_id: Uuid, fault: AgentFault) -> Self {
        Self {
            task_id,
            result: None,
            error: Some(fault),
        }
    }
}

/// Why a task did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the attempt timeout or the task deadline.
    Timeout,
    /// The agent could not be reached.
    ConnectionRefused,
    /// The response could not be decoded or violated the protocol.
    InvalidResponse,
    /// The agent explicitly reported a failure.
    AgentError,
    /// The registry has no live card for the target agent.
    AgentUnavailable,
    /// Not attempted because a stage it depends on did not succeed.
    UpstreamFailed,
}

impl FailureKind {
    /// Transport-level failures are worth another attempt; contract and
    /// agent-reported failures are not.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::ConnectionRefused)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::AgentError => "agent_error",
            FailureKind::AgentUnavailable => "agent_unavailable",
            FailureKind::UpstreamFailed => "upstream_failed",
        };
        write!(f, "{s}")
    }
}

/// Result of one task, produced exactly once by the communication channel
/// (or synthesized by the dispatcher for tasks that were never sent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The agent answered in time.
    Success {
        /// Payload returned by the agent.
        result: serde_json::Value,
        /// Time from the first attempt to the answer.
        latency_ms: u64,
    },
    /// Every attempt failed, or the task was never sent.
    Failure {
        /// Classification of the last failure.
        kind: FailureKind,
        /// Detail of the last failure.
        message: String,
    },
    /// Rejected by the agent's circuit breaker; no network attempt was made.
    CircuitOpen,
}

impl TaskOutcome {
    /// Success with the latency in whole milliseconds.
    pub fn success(result: serde_json::Value, latency: Duration) -> Self {
        TaskOutcome::Success {
            result,
            latency_ms: latency.as_millis() as u64,
        }
    }

    /// Failure of the given kind.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        TaskOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Whether this is `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    /// The success payload, if any.
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            TaskOutcome::Success { result, .. } => Some(result),
            _ => None,
        }
    }

    /// The failure kind, if this is a `Failure`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TaskOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Kind without the payload.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TaskOutcome::Success { .. } => OutcomeKind::Success,
            TaskOutcome::Failure { kind, .. } => OutcomeKind::Failure(*kind),
            TaskOutcome::CircuitOpen => OutcomeKind::CircuitOpen,
        }
    }
}

/// Payload-free classification of a [`TaskOutcome`], used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Task succeeded.
    Success,
    /// Task failed with this kind.
    Failure(FailureKind),
    /// Breaker rejected the task.
    CircuitOpen,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::Failure(kind) => write!(f, "{kind}"),
            OutcomeKind::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}
