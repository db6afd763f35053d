use crate::breaker::CircuitState;
use crate::observer::{CallEvent, CallObserver};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use switchyard_core::OutcomeKind;
use uuid::Uuid;

/// Counters tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Completed calls.
    pub calls: u64,
    /// Calls that ended in success.
    pub successes: u64,
    /// Calls that ended in failure.
    pub failures: u64,
    /// Calls rejected by the breaker.
    pub circuit_rejections: u64,
    /// Network attempts across all calls.
    pub attempts: u64,
    /// Summed latency of all calls.
    pub total_latency_ms: u64,
}

impl AgentMetrics {
    fn record(&mut self, event: &CallEvent) {
        self.calls += 1;
        self.attempts += u64::from(event.attempts);
        self.total_latency_ms += event.latency_ms;
        match event.outcome {
            OutcomeKind::Success => self.successes += 1,
            OutcomeKind::Failure(_) => self.failures += 1,
            OutcomeKind::CircuitOpen => self.circuit_rejections += 1,
        }
    }

    fn absorb(&mut self, other: &AgentMetrics) {
        self.calls += other.calls;
        self.successes += other.successes;
        self.failures += other.failures;
        self.circuit_rejections += other.circuit_rejections;
        self.attempts += other.attempts;
        self.total_latency_ms += other.total_latency_ms;
    }

    /// Mean latency over all calls, zero before the first call.
    pub fn mean_latency_ms(&self) -> u64 {
        self.total_latency_ms.checked_div(self.calls).unwrap_or(0)
    }
}

/// Latest known state of one agent as seen through its calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Agent id.
    pub agent_id: String,
    /// Breaker state after the last call.
    pub breaker_state: CircuitState,
    /// Outcome of the last call.
    pub last_outcome: Option<OutcomeKind>,
    /// Task id of the last call.
    pub last_task: Option<Uuid>,
    /// Running counters.
    pub metrics: AgentMetrics,
}

/// Tracks per-agent call metrics and breaker state from call events.
pub struct AgentMonitor {
    states: RwLock<HashMap<String, AgentHealth>>,
}

impl AgentMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Get the state of a specific agent.
    pub fn get_state(&self, agent_id: &str) -> Option<AgentHealth> {
        self.states.read().get(agent_id).cloned()
    }

    /// Get a snapshot of all agent states, sorted by agent id.
    pub fn snapshot(&self) -> Vec<AgentHealth> {
        let mut states: Vec<AgentHealth> = self.states.read().values().cloned().collect();
        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    /// Get aggregate metrics across all agents.
    pub fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read();
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.absorb(&state.metrics);
        }
        total
    }

    /// Forget agents no longer in the registry.
    pub fn forget(&self, agent_ids: &[String]) {
        let mut states = self.states.write();
        for id in agent_ids {
            states.remove(id);
        }
    }

    /// Serialize the current state as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot(),
            "aggregate": self.aggregate_metrics(),
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CallObserver for AgentMonitor {
    fn on_call(&self, event: &CallEvent) {
        let mut states = self.states.write();
        let state = states
            .entry(event.agent_id.clone())
            .or_insert_with(|| AgentHealth {
                agent_id: event.agent_id.clone(),
                breaker_state: CircuitState::Closed,
                last_outcome: None,
                last_task: None,
                metrics: AgentMetrics::default(),
            });
        state.breaker_state = event.breaker_state;
        state.last_outcome = Some(event.outcome);
        state.last_task = Some(event.task_id);
        state.metrics.record(event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use switchyard_core::FailureKind;

    fn event(agent: &str, outcome: OutcomeKind, latency_ms: u64, attempts: u32) -> CallEvent {
        CallEvent {
            agent_id: agent.into(),
            task_id: Uuid::new_v4(),
            outcome,
            latency_ms,
            attempts,
            breaker_state: CircuitState::Closed,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_initial_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().is_empty());
        assert_eq!(monitor.aggregate_metrics(), AgentMetrics::default());
    }

    #[test]
    fn test_record_metrics() {
        let monitor = AgentMonitor::new();
        monitor.on_call(&event("a", OutcomeKind::Success, 100, 1));
        monitor.on_call(&event("a", OutcomeKind::Failure(FailureKind::Timeout), 300, 3));
        monitor.on_call(&event("a", OutcomeKind::CircuitOpen, 0, 0));

        let state = monitor.get_state("a").unwrap();
        assert_eq!(state.metrics.calls, 3);
        assert_eq!(state.metrics.successes, 1);
        assert_eq!(state.metrics.failures, 1);
        assert_eq!(state.metrics.circuit_rejections, 1);
        assert_eq!(state.metrics.attempts, 4);
        assert_eq!(state.metrics.mean_latency_ms(), 133);
        assert_eq!(state.last_outcome, Some(OutcomeKind::CircuitOpen));
    }

    #[test]
    fn test_breaker_state_follows_last_event() {
        let monitor = AgentMonitor::new();
        let mut ev = event("a", OutcomeKind::Failure(FailureKind::ConnectionRefused), 5, 1);
        ev.breaker_state = CircuitState::Open;
        monitor.on_call(&ev);
        assert_eq!(monitor.get_state("a").unwrap().breaker_state, CircuitState::Open);
    }

    #[test]
    fn test_aggregate_and_forget() {
        let monitor = AgentMonitor::new();
        monitor.on_call(&event("a", OutcomeKind::Success, 10, 1));
        monitor.on_call(&event("b", OutcomeKind::Success, 20, 2));

        let agg = monitor.aggregate_metrics();
        assert_eq!(agg.calls, 2);
        assert_eq!(agg.attempts, 3);
        assert_eq!(agg.total_latency_ms, 30);

        monitor.forget(&["a".to_string()]);
        assert!(monitor.get_state("a").is_none());
        assert_eq!(monitor.snapshot().len(), 1);
    }

    #[test]
    fn test_to_json() {
        let monitor = AgentMonitor::new();
        monitor.on_call(&event("a", OutcomeKind::Success, 10, 1));
        let json = monitor.to_json();
        assert!(json["agents"].is_array());
        assert!(json["aggregate"].is_object());
        assert_eq!(json["agents"][0]["agent_id"], "a");
    }
}
