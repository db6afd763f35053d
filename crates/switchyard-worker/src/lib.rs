//! Worker-side harness for the Switchyard agent protocol.
//!
//! Implement [`TaskHandler`] for the work an agent does and hand it to
//! [`WorkerServer`], which publishes the agent card at
//! `/.well-known/agent.json`, accepts tasks on `POST /tasks`, enforces each
//! task's deadline, and answers `/health`.

/// Task handlers.
pub mod handler;
/// The axum server.
pub mod server;

pub use handler::{DelayedHandler, EchoHandler, TaskHandler};
pub use server::{RunningWorker, WorkerServer, WorkerState};
pub use switchyard_core::DEADLINE_EXCEEDED;
