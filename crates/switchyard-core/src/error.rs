use thiserror::Error;

/// A convenience `Result` alias using [`SwitchyardError`].
pub type SwitchyardResult<T> = Result<T, SwitchyardError>;

/// Top-level error type for Switchyard.
///
/// Per-task transport problems never surface through this type; they are
/// folded into a [`TaskOutcome`](crate::TaskOutcome) by the communication
/// channel. What remains here are lookup misses, caller mistakes and startup
/// faults.
#[derive(Error, Debug)]
pub enum SwitchyardError {
    /// The agent id is unknown to the registry, or its entry has expired.
    #[error("Agent not found: {0}")]
    NotFound(String),

    /// Configuration could not be parsed or failed validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A workflow plan is malformed (duplicate names, forward dependencies...).
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A discovery or task exchange failed at the transport level.
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// An error from an outbound HTTP client or the worker server.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
