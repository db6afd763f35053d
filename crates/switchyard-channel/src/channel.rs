use crate::backoff::Backoff;
use crate::breaker::CircuitBreakers;
use crate::observer::{notify_all, CallEvent, CallObserver};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    AgentCard, AgentTransport, FailureKind, SettingsProvider, Task, TaskOutcome, TransportError,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sends one task to one agent, gated by that agent's circuit breaker, with
/// per-attempt timeouts and retry under exponential backoff.
pub struct CommunicationChannel {
    transport: Arc<dyn AgentTransport>,
    breakers: Arc<CircuitBreakers>,
    settings: Arc<dyn SettingsProvider>,
    observers: Vec<Arc<dyn CallObserver>>,
    jitter: bool,
}

impl CommunicationChannel {
    /// Create a channel with jitter enabled and no observers.
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        breakers: Arc<CircuitBreakers>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            transport,
            breakers,
            settings,
            observers: Vec::new(),
            jitter: true,
        }
    }

    /// Register an observer for call events.
    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Use the deterministic lower bound of every backoff delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// The breakers this channel consults.
    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Deliver `task` to `target` and return how it ended.
    ///
    /// Never fails: every transport problem is folded into the outcome.
    /// Retries reuse the task id. Dropping the returned future abandons the
    /// call; an in-flight half-open probe is released without a verdict.
    pub async fn call(&self, target: &AgentCard, task: &Task) -> TaskOutcome {
        let agent_id = task.target_agent_id.as_str();
        let started = Instant::now();
        let deadline = started + task.remaining();
        let settings = self.settings.settings_for(agent_id);
        let mut backoff = Backoff::from(&settings);
        backoff.jitter = self.jitter;
        let request = task.to_request();

        let mut attempts: u32 = 0;
        let mut last_error: Option<TransportError> = None;

        let outcome = loop {
            let Some(permit) = self.breakers.acquire(agent_id) else {
                break match last_error.take() {
                    // Opened by our own failures: report what actually happened.
                    Some(e) => {
                        warn!(agent_id, task_id = %task.task_id, attempts, "Circuit opened mid-task, giving up");
                        TaskOutcome::failure(e.kind, e.message)
                    }
                    None => TaskOutcome::CircuitOpen,
                };
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(permit);
                break TaskOutcome::failure(
                    FailureKind::Timeout,
                    "task deadline passed before the request could be sent",
                );
            }

            attempts += 1;
            let wait = settings.timeout().min(remaining);
            debug!(agent_id, task_id = %task.task_id, attempt = attempts, wait_ms = wait.as_millis() as u64, "Sending task");

            let result =
                match tokio::time::timeout(wait, self.transport.send_task(&target.endpoint, &request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(format!(
                        "no response within {}ms",
                        wait.as_millis()
                    ))),
                };

            match result {
                Ok(value) => {
                    permit.succeed();
                    break TaskOutcome::success(value, started.elapsed());
                }
                Err(e) => {
                    permit.fail();

                    if !e.kind.is_retryable() {
                        warn!(agent_id, task_id = %task.task_id, attempt = attempts, error = %e, "Non-retryable failure");
                        break TaskOutcome::failure(e.kind, e.message);
                    }
                    if attempts > settings.max_retries {
                        warn!(agent_id, task_id = %task.task_id, attempts, error = %e, "Retries exhausted");
                        break TaskOutcome::failure(e.kind, e.message);
                    }

                    let delay = backoff.delay(attempts);
                    if Instant::now() + delay >= deadline {
                        warn!(agent_id, task_id = %task.task_id, attempts, delay_ms = delay.as_millis() as u64, error = %e, "Next retry would miss the deadline, giving up");
                        break TaskOutcome::failure(
                            FailureKind::Timeout,
                            format!("deadline reached after {attempts} attempt(s); last error: {e}"),
                        );
                    }

                    info!(agent_id, task_id = %task.task_id, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "Retryable failure, backing off");
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        };

        self.emit(task, &outcome, attempts, started.elapsed());
        outcome
    }

    fn emit(&self, task: &Task, outcome: &TaskOutcome, attempts: u32, latency: Duration) {
        if self.observers.is_empty() {
            return;
        }
        let event = CallEvent {
            agent_id: task.target_agent_id.clone(),
            task_id: task.task_id,
            outcome: outcome.kind(),
            latency_ms: latency.as_millis() as u64,
            attempts,
            breaker_state: self.breakers.state(&task.target_agent_id),
            at: Utc::now(),
        };
        notify_all(&self.observers, &event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use switchyard_core::{AgentSettings, OutcomeKind, TaskRequest};

    /// Plays back scripted replies, then answers `"ok"` forever.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<TaskRequest>>,
    }

    enum Reply {
        Ok(serde_json::Value),
        Err(TransportError),
        Hang,
    }

    impl ScriptedTransport {
        fn script(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn discover(&self, endpoint: &str) -> Result<AgentCard, TransportError> {
            Err(TransportError::refused(endpoint))
        }

        async fn send_task(
            &self,
            _endpoint: &str,
            request: &TaskRequest,
        ) -> Result<serde_json::Value, TransportError> {
            self.requests.lock().push(request.clone());
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Ok(v)) => Ok(v),
                Some(Reply::Err(e)) => Err(e),
                Some(Reply::Hang) => std::future::pending().await,
                None => Ok(json!("ok")),
            }
        }
    }

    fn refused() -> Reply {
        Reply::Err(TransportError::refused("connection refused"))
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<CallEvent>>);

    impl CallObserver for Collect {
        fn on_call(&self, event: &CallEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn channel(transport: Arc<ScriptedTransport>, settings: AgentSettings) -> CommunicationChannel {
        let settings: Arc<dyn SettingsProvider> = Arc::new(settings);
        let breakers = Arc::new(CircuitBreakers::new(settings.clone()));
        CommunicationChannel::new(transport, breakers, settings).without_jitter()
    }

    fn agent() -> AgentCard {
        AgentCard::new("worker", "Worker", "http://worker:1")
    }

    fn task(budget: Duration) -> Task {
        Task::new("worker", json!({"n": 1}), budget)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let transport = ScriptedTransport::script([Reply::Ok(json!(42))]);
        let ch = channel(transport.clone(), AgentSettings::default());

        let outcome = ch.call(&agent(), &task(Duration::from_secs(5))).await;
        assert_eq!(outcome.result(), Some(&json!(42)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let transport = ScriptedTransport::script([refused(), refused(), Reply::Ok(json!("done"))]);
        let settings = AgentSettings {
            max_retries: 2,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);
        let task = task(Duration::from_secs(10));

        let started = Instant::now();
        let outcome = ch.call(&agent(), &task).await;

        assert!(outcome.is_success());
        assert_eq!(transport.calls(), 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
        let state = ch.breakers().snapshot("worker").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.state, CircuitState::Closed);
        // Same task id on every attempt
        assert!(transport
            .requests
            .lock()
            .iter()
            .all(|r| r.task_id == task.task_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let transport = ScriptedTransport::script([refused(), refused(), refused(), refused()]);
        let settings = AgentSettings {
            max_retries: 2,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        let outcome = ch.call(&agent(), &task(Duration::from_secs(10))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ConnectionRefused));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_not_retried() {
        let transport = ScriptedTransport::script([Reply::Err(TransportError::invalid("garbage"))]);
        let ch = channel(transport.clone(), AgentSettings::default());

        let outcome = ch.call(&agent(), &task(Duration::from_secs(10))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidResponse));
        assert_eq!(transport.calls(), 1);
        assert_eq!(ch.breakers().snapshot("worker").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_error_not_retried() {
        let transport = ScriptedTransport::script([Reply::Err(TransportError::agent("bad input"))]);
        let ch = channel(transport.clone(), AgentSettings::default());

        let outcome = ch.call(&agent(), &task(Duration::from_secs(10))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::AgentError));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_scenario_open_then_probe_closes() {
        let transport = ScriptedTransport::script([refused(), refused(), refused()]);
        let settings = AgentSettings {
            max_retries: 0,
            circuit_failure_threshold: 3,
            circuit_cooldown_ms: 30_000,
            circuit_half_open_successes: 1,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        for _ in 0..3 {
            let outcome = ch.call(&agent(), &task(Duration::from_secs(5))).await;
            assert_eq!(outcome.failure_kind(), Some(FailureKind::ConnectionRefused));
        }
        assert_eq!(ch.breakers().state("worker"), CircuitState::Open);

        let outcome = ch.call(&agent(), &task(Duration::from_secs(5))).await;
        assert_eq!(outcome, TaskOutcome::CircuitOpen);
        assert_eq!(transport.calls(), 3, "rejected call must not reach the network");

        tokio::time::advance(Duration::from_secs(30)).await;

        let outcome = ch.call(&agent(), &task(Duration::from_secs(5))).await;
        assert!(outcome.is_success());
        assert_eq!(transport.calls(), 4);
        assert_eq!(ch.breakers().state("worker"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_task_stops_retries() {
        let transport = ScriptedTransport::script([refused(), refused(), refused(), refused()]);
        let settings = AgentSettings {
            max_retries: 5,
            circuit_failure_threshold: 2,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        let outcome = ch.call(&agent(), &task(Duration::from_secs(30))).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ConnectionRefused));
        assert_eq!(transport.calls(), 2);
        assert_eq!(ch.breakers().state("worker"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_never_outlives_deadline() {
        let transport = ScriptedTransport::script((0..10).map(|_| refused()));
        let settings = AgentSettings {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            circuit_failure_threshold: 100,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        let started = Instant::now();
        let outcome = ch.call(&agent(), &task(Duration::from_secs(1))).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(started.elapsed() <= Duration::from_secs(1));
        // 0ms, 100ms, 300ms, 700ms; the 800ms delay would overshoot
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_agent_bounded_by_deadline() {
        let transport = ScriptedTransport::script((0..10).map(|_| Reply::Hang));
        let settings = AgentSettings {
            timeout_ms: 400,
            max_retries: 10,
            base_delay_ms: 50,
            circuit_failure_threshold: 100,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        let started = Instant::now();
        let outcome = ch.call(&agent(), &task(Duration::from_secs(1))).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(started.elapsed() <= Duration::from_secs(1));
        assert!(transport.calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_task_is_not_sent() {
        let transport = ScriptedTransport::script(Vec::new());
        let ch = channel(transport.clone(), AgentSettings::default());
        let mut task = task(Duration::from_secs(1));
        task.deadline = Utc::now() - chrono::Duration::seconds(1);

        let outcome = ch.call(&agent(), &task).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_event_per_call() {
        let transport = ScriptedTransport::script([refused(), Reply::Ok(json!(1))]);
        let collect = Arc::new(Collect::default());
        let ch = channel(transport, AgentSettings::default()).with_observer(collect.clone());

        let task = task(Duration::from_secs(5));
        ch.call(&agent(), &task).await;

        let events = collect.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id, task.task_id);
        assert_eq!(events[0].outcome, OutcomeKind::Success);
        assert_eq!(events[0].attempts, 2);
        assert_eq!(events[0].breaker_state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_slot() {
        let transport =
            ScriptedTransport::script([refused(), Reply::Hang, Reply::Ok(json!("back"))]);
        let settings = AgentSettings {
            max_retries: 0,
            circuit_failure_threshold: 1,
            circuit_cooldown_ms: 1_000,
            ..AgentSettings::default()
        };
        let ch = channel(transport.clone(), settings);

        ch.call(&agent(), &task(Duration::from_secs(5))).await;
        assert_eq!(ch.breakers().state("worker"), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;

        // The probe hangs and is abandoned by the caller.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), ch.call(&agent(), &task(Duration::from_secs(5))))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(ch.breakers().state("worker"), CircuitState::HalfOpen);

        let outcome = ch.call(&agent(), &task(Duration::from_secs(5))).await;
        assert!(outcome.is_success());
        assert_eq!(ch.breakers().state("worker"), CircuitState::Closed);
    }
}
