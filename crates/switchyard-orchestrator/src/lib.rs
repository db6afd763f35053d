//! Workflow execution for Switchyard.
//!
//! A [`WorkflowPlan`] lists steps of stages. The [`TaskDispatcher`] resolves
//! each stage's agent in the registry, runs sequential steps in order and the
//! stages of a parallel step concurrently, and hands every stage outcome to
//! the [`aggregate`] function, which decides whether the workflow is
//! complete, partial or failed.
//!
//! [`Orchestrator`] assembles all of it from a [`SwitchyardConfig`](switchyard_core::SwitchyardConfig)
//! and owns the background maintenance loop.

/// Result aggregation.
pub mod aggregator;
/// Stage dispatch.
pub mod dispatcher;
/// The assembled orchestrator and its maintenance loop.
pub mod orchestrator;
/// Workflow plans.
pub mod plan;

pub use aggregator::{aggregate, StageRecord, StageReport, WorkflowResult, WorkflowStatus};
pub use dispatcher::TaskDispatcher;
pub use orchestrator::Orchestrator;
pub use plan::{Stage, Step, Target, WorkflowPlan};
