use crate::error::{SwitchyardError, SwitchyardResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Resilience settings for calls to a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt for transport failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff (also the jitter range).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// How long an open circuit rejects calls before probing.
    #[serde(default = "default_cooldown_ms")]
    pub circuit_cooldown_ms: u64,
    /// Successful probes needed to close a half-open circuit.
    #[serde(default = "default_half_open_successes")]
    pub circuit_half_open_successes: u32,
    /// How long a discovered card stays resolvable without being re-seen.
    #[serde(default = "default_registry_ttl_secs")]
    pub registry_ttl_secs: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_half_open_successes() -> u32 {
    1
}
fn default_registry_ttl_secs() -> u64 {
    120
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cooldown_ms: default_cooldown_ms(),
            circuit_half_open_successes: default_half_open_successes(),
            registry_ttl_secs: default_registry_ttl_secs(),
        }
    }
}

impl AgentSettings {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// First retry delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Retry delay cap.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// How long an open circuit waits before probing.
    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    /// How long a card stays valid without a refresh.
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    /// Check positivity and sane ranges. `scope` names the settings in errors.
    pub fn validate(&self, scope: &str) -> SwitchyardResult<()> {
        let fail = |msg: String| Err(SwitchyardError::Config(format!("{scope}: {msg}")));

        if self.timeout_ms == 0 {
            return fail("timeout_ms must be positive".into());
        }
        if self.base_delay_ms == 0 {
            return fail("base_delay_ms must be positive".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return fail(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return fail(format!(
                "max_retries ({}) exceeds limit of {MAX_RETRIES_LIMIT}",
                self.max_retries
            ));
        }
        if self.circuit_failure_threshold == 0 {
            return fail("circuit_failure_threshold must be at least 1".into());
        }
        if self.circuit_cooldown_ms == 0 {
            return fail("circuit_cooldown_ms must be positive".into());
        }
        if self.circuit_half_open_successes == 0 {
            return fail("circuit_half_open_successes must be at least 1".into());
        }
        if self.registry_ttl_secs == 0 {
            return fail("registry_ttl_secs must be positive".into());
        }
        Ok(())
    }
}

/// Per-agent overrides layered on top of [`AgentSettings`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    /// Overrides `timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overrides `max_retries`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Overrides `base_delay_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    /// Overrides `max_delay_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Overrides `circuit_failure_threshold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_failure_threshold: Option<u32>,
    /// Overrides `circuit_cooldown_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_cooldown_ms: Option<u64>,
    /// Overrides `circuit_half_open_successes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_half_open_successes: Option<u32>,
    /// Overrides `registry_ttl_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_ttl_secs: Option<u64>,
}

impl SettingsOverrides {
    /// Apply these overrides to `base`.
    pub fn apply(&self, base: &AgentSettings) -> AgentSettings {
        AgentSettings {
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            circuit_failure_threshold: self
                .circuit_failure_threshold
                .unwrap_or(base.circuit_failure_threshold),
            circuit_cooldown_ms: self.circuit_cooldown_ms.unwrap_or(base.circuit_cooldown_ms),
            circuit_half_open_successes: self
                .circuit_half_open_successes
                .unwrap_or(base.circuit_half_open_successes),
            registry_ttl_secs: self.registry_ttl_secs.unwrap_or(base.registry_ttl_secs),
        }
    }
}

/// A statically configured agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Expected agent id (as published in its card).
    pub id: String,
    /// Base URL used for discovery.
    pub endpoint: String,
    /// Settings that differ from `[defaults]`.
    #[serde(flatten)]
    pub overrides: SettingsOverrides,
}

/// Discovery loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interval between refresh + sweep passes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    30
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl DiscoveryConfig {
    /// Interval between maintenance passes.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Supplies resilience settings per agent id.
///
/// Agents without specific configuration get the provider's defaults.
pub trait SettingsProvider: Send + Sync {
    /// Effective settings for `agent_id`.
    fn settings_for(&self, agent_id: &str) -> AgentSettings;
}

/// Uniform settings for every agent.
impl SettingsProvider for AgentSettings {
    fn settings_for(&self, _agent_id: &str) -> AgentSettings {
        self.clone()
    }
}

/// Top-level `switchyard.toml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    /// Settings applied to every agent.
    #[serde(default)]
    pub defaults: AgentSettings,
    /// Refresh scheduling.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Configured agents, probed on every refresh.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl SwitchyardConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> SwitchyardResult<Self> {
        let config: SwitchyardConfig =
            toml::from_str(s).map_err(|e| SwitchyardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SwitchyardResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwitchyardError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Validate defaults, every agent entry, and the discovery interval.
    pub fn validate(&self) -> SwitchyardResult<()> {
        self.defaults.validate("defaults")?;

        if self.discovery.refresh_interval_secs == 0 {
            return Err(SwitchyardError::Config(
                "discovery: refresh_interval_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(SwitchyardError::Config("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(SwitchyardError::Config(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
            validate_endpoint(&agent.id, &agent.endpoint)?;

            let settings = agent.overrides.apply(&self.defaults);
            settings.validate(&format!("agent '{}'", agent.id))?;
            if self.discovery.refresh_interval_secs >= settings.registry_ttl_secs {
                return Err(SwitchyardError::Config(format!(
                    "agent '{}': refresh interval ({}s) must be shorter than registry_ttl_secs ({}s)",
                    agent.id, self.discovery.refresh_interval_secs, settings.registry_ttl_secs
                )));
            }
        }
        Ok(())
    }

    /// Configured entry for `agent_id`, if any.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    /// Endpoints to probe during discovery.
    pub fn seed_endpoints(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.endpoint.clone()).collect()
    }
}

impl SettingsProvider for SwitchyardConfig {
    fn settings_for(&self, agent_id: &str) -> AgentSettings {
        match self.agent(agent_id) {
            Some(agent) => agent.overrides.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

fn validate_endpoint(agent_id: &str, endpoint: &str) -> SwitchyardResult<()> {
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| {
            SwitchyardError::Config(format!(
                "agent '{agent_id}': endpoint '{endpoint}' must start with http:// or https://"
            ))
        })?;
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(SwitchyardError::Config(format!(
            "agent '{agent_id}': endpoint '{endpoint}' has no host"
        )));
    }
    Ok(())
}
