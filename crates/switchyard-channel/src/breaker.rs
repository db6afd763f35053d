use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{AgentSettings, SettingsProvider};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass; failures are counted.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A single probe call decides whether to close again.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one agent's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// Successful probes since entering HalfOpen.
    pub successes_in_half_open: u32,
}

/// Thresholds for a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe.
    pub cooldown: Duration,
    /// Successful probes that close a half-open circuit.
    pub half_open_successes: u32,
}

impl From<&AgentSettings> for BreakerConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            failure_threshold: settings.circuit_failure_threshold.max(1),
            cooldown: settings.circuit_cooldown(),
            half_open_successes: settings.circuit_half_open_successes.max(1),
        }
    }
}

/// Decision taken when a caller asks to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit: call freely.
    Allowed,
    /// Half-open circuit: this call is the single in-flight probe.
    Probe,
    /// Open circuit, or a probe is already in flight.
    Rejected,
}

/// Three-state failure tracker for one agent.
///
/// Closed counts consecutive failures and opens at the threshold. Open
/// rejects until the cooldown has elapsed, then the next caller moves it to
/// HalfOpen and becomes the probe. HalfOpen admits one probe at a time; a
/// probe failure reopens the circuit, enough probe successes close it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    successes_in_half_open: u32,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            successes_in_half_open: 0,
            probe_in_flight: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
            successes_in_half_open: self.successes_in_half_open,
        }
    }

    /// Ask to place a call at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.successes_in_half_open = 0;
                    self.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful call. `probe` says whether it was admitted as one.
    pub fn record_success(&mut self, probe: bool) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if probe => {
                self.probe_in_flight = false;
                self.successes_in_half_open += 1;
                if self.successes_in_half_open >= self.config.half_open_successes {
                    self.close();
                }
            }
            // Late result of a call admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&mut self, probe: bool, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen if probe => {
                self.consecutive_failures += 1;
                self.open(now);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Give back a probe slot whose call was abandoned without an outcome.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    /// Force the breaker back to Closed.
    pub fn reset(&mut self) {
        self.close();
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.successes_in_half_open = 0;
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.successes_in_half_open = 0;
        self.probe_in_flight = false;
    }
}

/// Admission to call an agent. Settle it with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail); dropping it unsettled frees a held probe slot.
pub struct CallPermit {
    agent_id: String,
    breaker: Arc<Mutex<CircuitBreaker>>,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record success and return the breaker state afterwards.
    pub fn succeed(mut self) -> CircuitState {
        self.settled = true;
        let mut breaker = self.breaker.lock();
        let before = breaker.state();
        breaker.record_success(self.probe);
        let after = breaker.state();
        if before != after {
            info!(agent_id = %self.agent_id, from = %before, to = %after, "Circuit state changed");
        }
        after
    }

    /// Record failure and return the breaker state afterwards.
    pub fn fail(mut self) -> CircuitState {
        self.settled = true;
        let mut breaker = self.breaker.lock();
        let before = breaker.state();
        breaker.record_failure(self.probe, Instant::now());
        let after = breaker.state();
        if before != after {
            warn!(agent_id = %self.agent_id, from = %before, to = %after, "Circuit state changed");
        }
        after
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.lock().release_probe();
        }
    }
}

/// One breaker per agent id, created on first use.
///
/// The map lock is only held to find or insert a breaker; transitions lock
/// that agent's breaker alone, so agents never contend with each other.
pub struct CircuitBreakers {
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    settings: Arc<dyn SettingsProvider>,
}

impl CircuitBreakers {
    /// Create an empty set; breakers are built from `settings` on first use.
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            settings,
        }
    }

    fn breaker(&self, agent_id: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.read().get(agent_id) {
            return breaker.clone();
        }
        let config = BreakerConfig::from(&self.settings.settings_for(agent_id));
        self.breakers
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(config))))
            .clone()
    }

    /// Try to get through `agent_id`'s breaker. `None` means rejected.
    pub fn acquire(&self, agent_id: &str) -> Option<CallPermit> {
        let breaker = self.breaker(agent_id);
        let admission = breaker.lock().try_acquire(Instant::now());
        match admission {
            Admission::Rejected => None,
            Admission::Allowed | Admission::Probe => {
                if admission == Admission::Probe {
                    info!(agent_id = %agent_id, "Circuit half-open, sending probe");
                }
                Some(CallPermit {
                    agent_id: agent_id.to_string(),
                    breaker,
                    probe: admission == Admission::Probe,
                    settled: false,
                })
            }
        }
    }

    /// Current state; agents never called are Closed.
    pub fn state(&self, agent_id: &str) -> CircuitState {
        self.snapshot(agent_id)
            .map_or(CircuitState::Closed, |s| s.state)
    }

    /// Counters of `agent_id`'s breaker, if one exists.
    pub fn snapshot(&self, agent_id: &str) -> Option<CircuitBreakerState> {
        let breaker = self.breakers.read().get(agent_id).cloned();
        breaker.map(|b| b.lock().snapshot())
    }

    /// Force an agent's breaker back to Closed.
    pub fn reset(&self, agent_id: &str) {
        if let Some(breaker) = self.breakers.read().get(agent_id) {
            breaker.lock().reset();
        }
    }

    /// Drop the breakers of the given agents (e.g. evicted from the registry).
    pub fn prune(&self, agent_ids: &[String]) {
        if agent_ids.is_empty() {
            return;
        }
        let mut breakers = self.breakers.write();
        for id in agent_ids {
            breakers.remove(id);
        }
    }

    /// Number of tracked agents.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no agent has a breaker yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
