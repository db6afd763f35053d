use crate::breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use switchyard_core::OutcomeKind;
use tracing::{info, warn};
use uuid::Uuid;

/// Emitted once per completed [`call`](crate::CommunicationChannel::call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    /// Target agent.
    pub agent_id: String,
    /// Task that was sent.
    pub task_id: Uuid,
    /// How the call ended.
    pub outcome: OutcomeKind,
    /// Wall time of the whole call.
    pub latency_ms: u64,
    /// Network attempts made (zero when the circuit rejected the call).
    pub attempts: u32,
    /// Breaker state once the call settled.
    pub breaker_state: CircuitState,
    /// When the call finished.
    pub at: DateTime<Utc>,
}

/// Fire-and-forget sink for call events.
///
/// Implementations must not block; they run inline on the calling task.
pub trait CallObserver: Send + Sync {
    /// Called once the call has settled.
    fn on_call(&self, event: &CallEvent);
}

/// Logs every call event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CallObserver for TracingObserver {
    fn on_call(&self, event: &CallEvent) {
        match event.outcome {
            OutcomeKind::Success => info!(
                agent_id = %event.agent_id,
                task_id = %event.task_id,
                latency_ms = event.latency_ms,
                attempts = event.attempts,
                breaker = %event.breaker_state,
                "Agent call succeeded"
            ),
            outcome => warn!(
                agent_id = %event.agent_id,
                task_id = %event.task_id,
                outcome = %outcome,
                latency_ms = event.latency_ms,
                attempts = event.attempts,
                breaker = %event.breaker_state,
                "Agent call failed"
            ),
        }
    }
}

/// Deliver `event` to every observer. A panicking observer is logged and
/// skipped; it never reaches the caller.
pub(crate) fn notify_all(observers: &[Arc<dyn CallObserver>], event: &CallEvent) {
    for observer in observers {
        if catch_unwind(AssertUnwindSafe(|| observer.on_call(event))).is_err() {
            warn!(agent_id = %event.agent_id, "Call observer panicked; event dropped");
        }
    }
}
