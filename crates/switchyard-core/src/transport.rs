use crate::card::AgentCard;
use crate::task::{FailureKind, TaskRequest};
use async_trait::async_trait;
use std::fmt;

/// A failed discovery or task exchange, classified by [`FailureKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    /// Error of an explicit kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The exchange did not finish in time.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// The agent could not be reached or is overloaded.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ConnectionRefused, message)
    }

    /// The agent answered with something unusable.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidResponse, message)
    }

    /// The agent reported its own failure.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AgentError, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// The two request types every worker agent answers.
///
/// Implementations perform exactly one exchange per call: no retries and no
/// timeouts of their own. Both are layered on top by the communication
/// channel.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Fetch the agent card published at `endpoint`.
    async fn discover(&self, endpoint: &str) -> Result<AgentCard, TransportError>;

    /// Deliver a task to the agent at `endpoint` and return its result payload.
    async fn send_task(
        &self,
        endpoint: &str,
        request: &TaskRequest,
    ) -> Result<serde_json::Value, TransportError>;
}
