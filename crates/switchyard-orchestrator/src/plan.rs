use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// One call in a workflow: which agent, with what, after which stages.
///
/// The target is either a fixed agent id or a skill, resolved at dispatch
/// time to the first live agent advertising it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique stage name; defaults to the agent id (or skill).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target agent id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Target skill; resolved to the lowest matching agent id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    /// A failed required stage fails the whole workflow.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Static payload. When absent, the stage receives its upstream outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Budget for this stage, retries included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Stages that must succeed before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_required() -> bool {
    true
}

/// What a stage calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// A specific agent id.
    Agent(&'a str),
    /// Any agent advertising the skill.
    Skill(&'a str),
}

impl Stage {
    fn blank() -> Self {
        Self {
            name: None,
            agent: None,
            skill: None,
            required: true,
            payload: None,
            timeout_ms: None,
            depends_on: Vec::new(),
        }
    }

    /// A required stage calling agent `id`.
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            agent: Some(id.into()),
            ..Self::blank()
        }
    }

    /// A required stage calling whichever live agent advertises `skill`.
    pub fn skill(skill: impl Into<String>) -> Self {
        Self {
            skill: Some(skill.into()),
            ..Self::blank()
        }
    }

    /// Set the stage name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the stage as not required.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Send a fixed payload instead of upstream outputs.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Bound the stage, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Run only after `stage` succeeded.
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    /// Stage name, falling back to the target.
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.agent.as_deref())
            .or(self.skill.as_deref())
            .unwrap_or_default()
    }

    /// The call target. Only meaningful on a validated plan.
    pub fn target(&self) -> Target<'_> {
        match (&self.agent, &self.skill) {
            (Some(agent), _) => Target::Agent(agent),
            (None, Some(skill)) => Target::Skill(skill),
            (None, None) => Target::Agent(""),
        }
    }

    /// Stage budget, if set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), String> {
        let name = self.name();
        match (&self.agent, &self.skill) {
            (Some(_), Some(_)) => {
                return Err(format!("stage '{name}' names both an agent and a skill"))
            }
            (None, None) => return Err("a stage has neither an agent nor a skill".into()),
            (Some(target), None) | (None, Some(target)) if target.trim().is_empty() => {
                return Err(format!("stage '{name}' has an empty target"))
            }
            _ => {}
        }
        if name.trim().is_empty() {
            return Err("stage name must not be empty".into());
        }
        if self.timeout_ms == Some(0) {
            return Err(format!("stage '{name}': timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// A group of stages that run concurrently. A single-stage step is just a
/// sequential stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stages of this step.
    pub stages: Vec<Stage>,
}

impl Step {
    /// A step with one stage.
    pub fn single(stage: Stage) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    /// A step whose stages run concurrently.
    pub fn parallel(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
    }

    /// Whether the step holds more than one stage.
    pub fn is_parallel(&self) -> bool {
        self.stages.len() > 1
    }
}

/// An ordered list of steps, optionally bounded by a workflow deadline.
///
/// ```toml
/// deadline_ms = 20000
///
/// [[steps]]
/// [[steps.stages]]
/// agent = "thinking"
/// payload = { action = "pick" }
///
/// [[steps]]
/// [[steps.stages]]
/// name = "guess"
/// agent = "guessing"
/// depends_on = ["thinking"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// Plan name, used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Overall deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Steps, run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl WorkflowPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sequential stage.
    pub fn then(mut self, stage: Stage) -> Self {
        self.steps.push(Step::single(stage));
        self
    }

    /// Append a group of concurrent stages.
    pub fn parallel(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.steps.push(Step::parallel(stages));
        self
    }

    /// Set the overall deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    /// The overall deadline, if set.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Every stage in plan order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.steps.iter().flat_map(|step| step.stages.iter())
    }

    /// Parse and validate a TOML plan.
    pub fn from_toml_str(s: &str) -> SwitchyardResult<Self> {
        let plan: WorkflowPlan =
            toml::from_str(s).map_err(|e| SwitchyardError::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read a plan from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SwitchyardResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwitchyardError::InvalidPlan(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check stage targets, name uniqueness, and that every dependency
    /// names a stage of an earlier step.
    pub fn validate(&self) -> SwitchyardResult<()> {
        let invalid = SwitchyardError::InvalidPlan;

        if self.stages().next().is_none() {
            return Err(invalid("plan has no stages".into()));
        }
        if self.deadline_ms == Some(0) {
            return Err(invalid("deadline_ms must be positive".into()));
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.stages.is_empty() {
                return Err(invalid(format!("step {index} has no stages")));
            }

            let mut current: HashSet<&str> = HashSet::new();
            for stage in &step.stages {
                stage.validate().map_err(invalid)?;
                let name = stage.name();
                if earlier.contains(name) || !current.insert(name) {
                    return Err(invalid(format!("duplicate stage name '{name}'")));
                }
                for dep in &stage.depends_on {
                    if !earlier.contains(dep.as_str()) {
                        return Err(invalid(format!(
                            "stage '{name}' depends on '{dep}', which is not in an earlier step"
                        )));
                    }
                }
            }
            earlier.extend(current);
        }
        Ok(())
    }
}
