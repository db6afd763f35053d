use async_trait::async_trait;
use std::time::Duration;
use switchyard_core::AgentFault;

/// The task-processing capability a worker exposes.
///
/// Implementations see only the payload; the server takes care of the
/// envelope, task id correlation and the deadline.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task. A fault is sent back as a structured error.
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AgentFault>;
}

/// Returns the payload unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AgentFault> {
        Ok(payload)
    }
}

/// Wraps another handler and holds every answer back for `delay`.
pub struct DelayedHandler<H> {
    inner: H,
    delay: Duration,
}

impl<H> DelayedHandler<H> {
    /// Delay every answer of `inner` by `delay`.
    pub fn new(inner: H, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for DelayedHandler<H> {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, AgentFault> {
        tokio::time::sleep(self.delay).await;
        self.inner.handle(payload).await
    }
}
