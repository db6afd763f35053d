use crate::aggregator::WorkflowResult;
use crate::dispatcher::TaskDispatcher;
use crate::plan::WorkflowPlan;
use std::sync::Arc;
use std::time::Duration;
use switchyard_channel::{
    AgentMonitor, CircuitBreakers, CommunicationChannel, HttpTransport, TracingObserver,
};
use switchyard_core::{AgentTransport, SettingsProvider, SwitchyardConfig, SwitchyardResult};
use switchyard_registry::{AgentRegistry, RefreshReport};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Wires registry, breakers, channel and dispatcher together from one
/// configuration.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    breakers: Arc<CircuitBreakers>,
    monitor: Arc<AgentMonitor>,
    dispatcher: TaskDispatcher,
    refresh_interval: Duration,
}

impl Orchestrator {
    /// Build from a validated configuration over the HTTP transport.
    pub fn from_config(config: SwitchyardConfig) -> SwitchyardResult<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Build from a configuration over any transport.
    pub fn with_transport(
        config: SwitchyardConfig,
        transport: Arc<dyn AgentTransport>,
    ) -> SwitchyardResult<Self> {
        config.validate()?;
        let refresh_interval = config.discovery.refresh_interval();
        let seeds = config.seed_endpoints();
        let settings: Arc<dyn SettingsProvider> = Arc::new(config);

        let registry =
            Arc::new(AgentRegistry::new(transport.clone(), settings.clone()).with_seeds(seeds));
        let breakers = Arc::new(CircuitBreakers::new(settings.clone()));
        let monitor = Arc::new(AgentMonitor::new());
        let channel = Arc::new(
            CommunicationChannel::new(transport, breakers.clone(), settings.clone())
                .with_observer(Arc::new(TracingObserver))
                .with_observer(monitor.clone()),
        );
        let dispatcher = TaskDispatcher::new(registry.clone(), channel, settings);

        Ok(Self {
            registry,
            breakers,
            monitor,
            dispatcher,
            refresh_interval,
        })
    }

    /// The agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Per-agent circuit breakers.
    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Per-agent call metrics.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Probe every seed and known agent once.
    ///
    /// Agents evicted since the last sweep lose their breaker and metrics
    /// here, so a rediscovered agent starts from a closed circuit.
    pub async fn discover(&self) -> RefreshReport {
        let report = self.registry.refresh().await;
        self.forget_evicted();
        report
    }

    /// Run one workflow plan.
    pub async fn dispatch(&self, plan: &WorkflowPlan) -> SwitchyardResult<WorkflowResult> {
        self.dispatcher.dispatch(plan).await
    }

    /// One maintenance pass: refresh, sweep expired agents, and drop the
    /// breakers and metrics of the evicted ones. Returns the evicted ids.
    pub async fn maintain(&self) -> Vec<String> {
        let report = self.registry.refresh().await;
        let evicted = self.forget_evicted();
        debug!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            live = self.registry.len(),
            "Maintenance pass complete"
        );
        evicted
    }

    /// Sweep the registry and drop per-agent state of every evicted id,
    /// whether it expired now or was purged on an earlier lookup.
    fn forget_evicted(&self) -> Vec<String> {
        let evicted = self.registry.sweep();
        if !evicted.is_empty() {
            self.breakers.prune(&evicted);
            self.monitor.forget(&evicted);
            info!(evicted = ?evicted, "Pruned evicted agents");
        }
        evicted
    }

    /// Run [`maintain`](Self::maintain) every `discovery.refresh_interval_secs`
    /// until the handle is aborted.
    pub fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.refresh_interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                self.maintain().await;
            }
        })
    }
}
