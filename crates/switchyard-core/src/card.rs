use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Well-known path at which every worker publishes its [`AgentCard`].
pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

/// Path at which every worker accepts task requests.
pub const TASKS_PATH: &str = "/tasks";

/// Self-describing capability record published by a worker agent.
///
/// Cards are never patched: a refresh replaces the stored card wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Unique agent identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the agent does.
    #[serde(default)]
    pub description: String,
    /// Base URL of the agent (discovery and task endpoints hang off it).
    pub endpoint: String,
    /// Skill tags advertised by the agent.
    #[serde(default)]
    pub skills: BTreeSet<String>,
    /// When the registry last ingested this card.
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

impl AgentCard {
    /// Create a card with no description and no skills.
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            endpoint: endpoint.into(),
            skills: BTreeSet::new(),
            last_seen: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a skill tag.
    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    /// Whether the agent advertises the given skill.
    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill)
    }

    /// Return a copy of this card stamped as seen at `at`.
    pub fn seen_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_seen: at,
            ..self.clone()
        }
    }

    /// Full URL of the discovery document.
    pub fn card_url(&self) -> String {
        join_url(&self.endpoint, AGENT_CARD_PATH)
    }

    /// Full URL of the task endpoint.
    pub fn tasks_url(&self) -> String {
        join_url(&self.endpoint, TASKS_PATH)
    }
}

/// Join a base endpoint and an absolute path without doubling the slash.
pub fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}
