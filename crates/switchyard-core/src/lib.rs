//! Core types, errors and configuration for Switchyard.
//!
//! This crate holds everything the other Switchyard crates share: the agent
//! card contract, tasks and their outcomes, the error enum, per-agent
//! resilience settings, and the transport trait through which discovery and
//! task requests reach worker agents.
//!
//! # Main types
//!
//! - [`SwitchyardError`]: Unified error enum.
//! - [`SwitchyardResult`]: Convenience alias for `Result<T, SwitchyardError>`.
//! - [`AgentCard`]: Capability record published by a worker.
//! - [`Task`] / [`TaskOutcome`]: One unit of work and how it ended.
//! - [`AgentSettings`] / [`SwitchyardConfig`]: Resilience settings and the config file.
//! - [`AgentTransport`]: Discovery and task exchange with a worker.

/// Agent cards and well-known paths.
pub mod card;
/// Settings, config file and the settings provider trait.
pub mod config;
/// Error types.
pub mod error;
/// Tasks, wire messages and outcomes.
pub mod task;
/// Transport abstraction.
pub mod transport;

pub use card::{join_url, AgentCard, AGENT_CARD_PATH, TASKS_PATH};
pub use config::{
    AgentConfig, AgentSettings, DiscoveryConfig, SettingsOverrides, SettingsProvider,
    SwitchyardConfig,
};
pub use error::{SwitchyardError, SwitchyardResult};
pub use task::{
    deadline_after, AgentFault, DEADLINE_EXCEEDED, FailureKind, OutcomeKind, Task, TaskOutcome, TaskRequest,
    TaskResponse,
};
pub use transport::{AgentTransport, TransportError};
