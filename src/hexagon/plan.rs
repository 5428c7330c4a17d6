//! Plan, step, and action value types.
//!
//! Planners decompose a goal into an ordered list of executable steps. Plans
//! are value-typed and serializable so they can be persisted, replayed, and
//! revised; execution engines live elsewhere.
//!
//! # Example
//!
//! ```rust
//! use hexagon::plan::{Action, ActionType, Plan, StepState};
//!
//! let mut plan = Plan::new("index the repository");
//! plan.push_step("scan files", Action::new(ActionType::Tool, "walk"));
//! plan.push_step("embed chunks", Action::new(ActionType::Llm, "embed"));
//!
//! assert_eq!(plan.steps[1].id, "step-2");
//! assert_eq!(plan.steps[1].state, StepState::Pending);
//! assert!(plan.validate());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Plan-level progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl PlanState {
    /// Completed, Failed, and Canceled are sticky: once entered, the plan
    /// never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanState::Completed | PlanState::Failed | PlanState::Canceled
        )
    }
}

/// Step-level progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// What kind of executor a step's action dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Tool,
    Agent,
    Llm,
    Function,
    Subplan,
}

/// An executable unit referenced by a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub description: String,
}

impl Action {
    pub fn new(action_type: ActionType, name: impl Into<String>) -> Self {
        Self {
            action_type,
            name: name.into(),
            parameters: HashMap::new(),
            description: String::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Outcome of executing one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens: usize,
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Position in the plan; contiguous from zero.
    pub index: usize,
    pub description: String,
    pub action: Action,
    pub state: StepState,
    /// Ids of prior steps in the same plan that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl Step {
    pub fn new(index: usize, description: impl Into<String>, action: Action) -> Self {
        Self {
            id: format!("step-{}", index + 1),
            index,
            description: description.into(),
            action,
            state: StepState::Pending,
            dependencies: Vec::new(),
            result: None,
        }
    }
}

/// A goal decomposed into ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub state: PlanState,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps: Vec::new(),
            state: PlanState::Pending,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition the plan state. Terminal states are sticky; a transition
    /// out of one is ignored.
    pub fn set_state(&mut self, state: PlanState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Append a step with the next contiguous index and a `step-N` id.
    pub fn push_step(&mut self, description: impl Into<String>, action: Action) -> &Step {
        let step = Step::new(self.steps.len(), description, action);
        self.steps.push(step);
        self.updated_at = Utc::now();
        self.steps.last().expect("just pushed")
    }

    /// Steps that have completed, in index order.
    pub fn completed_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .collect()
    }

    /// Check the structural invariants: contiguous indices from zero and
    /// dependencies referencing prior step ids only.
    pub fn validate(&self) -> bool {
        for (i, step) in self.steps.iter().enumerate() {
            if step.index != i {
                return false;
            }
            for dep in &step.dependencies {
                let referenced = self.steps[..i].iter().any(|prior| &prior.id == dep);
                if !referenced {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_get_contiguous_ids_and_indices() {
        let mut plan = Plan::new("test");
        plan.push_step("one", Action::new(ActionType::Tool, "t1"));
        plan.push_step("two", Action::new(ActionType::Llm, "gen"));
        assert_eq!(plan.steps[0].id, "step-1");
        assert_eq!(plan.steps[1].id, "step-2");
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[1].index, 1);
        assert!(plan.validate());
    }

    #[test]
    fn terminal_plan_states_are_sticky() {
        let mut plan = Plan::new("test");
        plan.set_state(PlanState::Running);
        plan.set_state(PlanState::Completed);
        plan.set_state(PlanState::Running);
        assert_eq!(plan.state, PlanState::Completed);
    }

    #[test]
    fn dependencies_must_reference_prior_steps() {
        let mut plan = Plan::new("test");
        plan.push_step("one", Action::new(ActionType::Tool, "t1"));
        let mut bad = Step::new(1, "two", Action::new(ActionType::Tool, "t2"));
        bad.dependencies.push("step-9".to_string());
        plan.steps.push(bad);
        assert!(!plan.validate());
    }

    #[test]
    fn plan_round_trips_through_json() {
        let mut plan = Plan::new("serialize me");
        plan.push_step("one", Action::new(ActionType::Function, "f"));
        let text = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&text).unwrap();
        assert_eq!(back.goal, "serialize me");
        assert_eq!(back.steps.len(), 1);
        assert_eq!(back.steps[0].action.action_type, ActionType::Function);
    }
}
