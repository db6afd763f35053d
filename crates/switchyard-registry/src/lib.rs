//! Agent registry with TTL-based eviction and discovery refresh.
//!
//! The registry is the only place the orchestrator learns about agents. Cards
//! enter through discovery (or direct registration), stay resolvable for
//! their configured TTL, and are purged once it elapses unless a refresh saw
//! them again.

/// Discovery requests and refresh passes.
pub mod discovery;
/// The TTL-keyed card store.
pub mod registry;

pub use discovery::RefreshReport;
pub use registry::{AgentRegistry, DEFAULT_DISCOVERY_TIMEOUT};
