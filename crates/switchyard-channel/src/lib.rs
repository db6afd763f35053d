//! Resilient agent calls for Switchyard.
//!
//! Every outbound task goes through a [`CommunicationChannel`], which
//! consults the target's [`CircuitBreaker`](breaker::CircuitBreaker), bounds
//! each attempt by the agent timeout and the task deadline, retries transport
//! failures under exponential [`Backoff`], and reports one [`CallEvent`] per
//! call to its observers.
//!
//! # Main types
//!
//! - [`CommunicationChannel`]: Single-task call with retry and breaker gating.
//! - [`CircuitBreakers`]: Per-agent circuit breakers.
//! - [`HttpTransport`]: `reqwest` implementation of the agent protocol.
//! - [`AgentMonitor`] / [`TracingObserver`]: Call observers.

/// Exponential backoff with jitter.
pub mod backoff;
/// Per-agent circuit breaker state machine.
pub mod breaker;
/// The communication channel.
pub mod channel;
/// HTTP/JSON agent transport.
pub mod http;
/// Per-agent call metrics.
pub mod monitor;
/// Call events and observers.
pub mod observer;

pub use backoff::{compute_backoff, Backoff};
pub use breaker::{
    BreakerConfig, CallPermit, CircuitBreaker, CircuitBreakerState, CircuitBreakers, CircuitState,
};
pub use channel::CommunicationChannel;
pub use http::HttpTransport;
pub use monitor::{AgentHealth, AgentMetrics, AgentMonitor};
pub use observer::{CallEvent, CallObserver, TracingObserver};
