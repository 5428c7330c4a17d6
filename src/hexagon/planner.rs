//! Planner engine: goal → ordered steps, with feedback-driven revision.
//!
//! Three planner variants share the [`Planner`] interface:
//!
//! - [`SequentialPlanner`] emits the full step list up-front from a single
//!   LLM call and can replan around completed steps.
//! - [`StepwisePlanner`] plans one step at a time, feeding the previous
//!   step's result back into each prompt, bounded by `max_steps`.
//! - [`ActionPlanner`] picks exactly one action from a pre-declared set.
//!
//! Planner LLM responses are parsed tolerantly: the outermost `{...}`
//! substring is extracted before JSON decoding, so prose wrappers around the
//! JSON do not break parsing. A response that still fails to parse degrades
//! to an empty plan rather than an error — planning is advisory, and the
//! caller may retry.

use crate::completer::{Completer, Message};
use crate::error::{Error, Result};
use crate::plan::{Action, ActionType, Plan, Step, StepResult, StepState};
use crate::tool::ToolMetadata;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Default bound on stepwise plan growth.
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Inputs shared by the planner variants.
#[derive(Default, Clone)]
pub struct PlanOptions {
    /// Tools the plan may dispatch to, rendered into the prompt.
    pub tools: Vec<ToolMetadata>,
    /// Free-form metadata copied onto the produced plan.
    pub metadata: HashMap<String, Value>,
}

/// Planner interface: produce a plan for a goal, and revise one on feedback.
#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(&self, goal: &str, opts: &PlanOptions) -> Result<Plan>;

    async fn replan(&self, plan: &Plan, feedback: &str) -> Result<Plan>;
}

// ── Sequential ────────────────────────────────────────────────────────────

/// Emits the full step list up-front via a single LLM prompt.
pub struct SequentialPlanner {
    completer: Arc<dyn Completer>,
}

impl SequentialPlanner {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }

    async fn generate(&self, prompt: String, goal: &str, opts: &PlanOptions) -> Result<Plan> {
        let response = self
            .completer
            .complete(&[Message::user(prompt)])
            .await
            .map_err(|err| Error::external(format!("planning '{}'", goal), err))?;

        let mut plan = Plan::new(goal);
        plan.metadata = opts.metadata.clone();
        match parse_steps(&response.content) {
            Some(steps) => {
                for parsed in steps {
                    let action = parsed.action.into_action();
                    let dependencies = parsed.dependencies;
                    plan.push_step(parsed.description, action);
                    let step = plan.steps.last_mut().expect("just pushed");
                    step.dependencies = dependencies;
                }
            }
            None => {
                // Advisory contract: unparseable responses yield an empty
                // plan, never an error, so the caller can decide to retry.
                debug!("planner response did not contain a step list");
            }
        }
        Ok(plan)
    }
}

#[async_trait]
impl Planner for SequentialPlanner {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn plan(&self, goal: &str, opts: &PlanOptions) -> Result<Plan> {
        let prompt = build_plan_prompt(goal, &opts.tools);
        self.generate(prompt, goal, opts).await
    }

    /// Issue a revised plan: completed steps are preserved verbatim and the
    /// newly generated tail is appended, reindexed to continue after them.
    async fn replan(&self, plan: &Plan, feedback: &str) -> Result<Plan> {
        let prompt = build_replan_prompt(plan, feedback);
        let generated = self
            .generate(prompt, &plan.goal, &PlanOptions::default())
            .await?;

        let mut revised = Plan::new(plan.goal.clone());
        revised.id = plan.id.clone();
        revised.metadata = plan.metadata.clone();
        for completed in plan.completed_steps() {
            let mut step = completed.clone();
            step.index = revised.steps.len();
            revised.steps.push(step);
        }
        let preserved = revised.steps.len();
        for generated_step in generated.steps {
            let index = revised.steps.len();
            let mut step = Step::new(index, generated_step.description, generated_step.action);
            step.id = format!("step-{}", index + 1);
            step.dependencies = generated_step.dependencies;
            revised.steps.push(step);
        }
        debug!(
            "replanned '{}': kept {} completed, added {} new",
            revised.goal,
            preserved,
            revised.steps.len() - preserved
        );
        Ok(revised)
    }
}

// ── Stepwise ──────────────────────────────────────────────────────────────

/// Plans one step per iteration, with the history of completed steps and
/// the last result in each prompt.
pub struct StepwisePlanner {
    completer: Arc<dyn Completer>,
    max_steps: usize,
}

impl StepwisePlanner {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Ask the LLM for the next step given the plan so far.
    ///
    /// Returns `Ok(None)` when the model signals the plan is done. Exceeding
    /// the step bound fails with [`Error::MaxStepsExceeded`]. The new step
    /// is appended to the plan before being returned.
    pub async fn plan_next_step(
        &self,
        plan: &mut Plan,
        last_result: Option<&StepResult>,
    ) -> Result<Option<Step>> {
        if plan.steps.len() >= self.max_steps {
            return Err(Error::MaxStepsExceeded {
                max: self.max_steps,
            });
        }

        let prompt = build_next_step_prompt(plan, last_result);
        let response = self
            .completer
            .complete(&[Message::user(prompt)])
            .await
            .map_err(|err| Error::external(format!("planning '{}'", plan.goal), err))?;

        let parsed: Option<NextStepResponse> = extract_json_object(&response.content)
            .and_then(|json| serde_json::from_str(json).ok());
        let next = match parsed {
            Some(NextStepResponse { done: true, .. }) | None => return Ok(None),
            Some(NextStepResponse {
                step: Some(step), ..
            }) => step,
            Some(NextStepResponse { step: None, .. }) => return Ok(None),
        };

        plan.push_step(next.description, next.action.into_action());
        let step = plan.steps.last_mut().expect("just pushed");
        step.dependencies = next.dependencies;
        Ok(Some(step.clone()))
    }
}

#[async_trait]
impl Planner for StepwisePlanner {
    fn name(&self) -> &str {
        "stepwise"
    }

    /// Stepwise planning starts from an empty plan; steps arrive through
    /// [`StepwisePlanner::plan_next_step`].
    async fn plan(&self, goal: &str, opts: &PlanOptions) -> Result<Plan> {
        let mut plan = Plan::new(goal);
        plan.metadata = opts.metadata.clone();
        Ok(plan)
    }

    /// Feedback is recorded on the plan and folded into subsequent
    /// next-step prompts.
    async fn replan(&self, plan: &Plan, feedback: &str) -> Result<Plan> {
        let mut revised = plan.clone();
        revised
            .metadata
            .insert("feedback".to_string(), Value::String(feedback.to_string()));
        Ok(revised)
    }
}

// ── Action ────────────────────────────────────────────────────────────────

/// Selects exactly one action from a declared set.
pub struct ActionPlanner {
    actions: Vec<Action>,
    completer: Option<Arc<dyn Completer>>,
}

impl ActionPlanner {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            completer: None,
        }
    }

    pub fn with_completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    async fn select(&self, goal: &str) -> Action {
        let fallback = self.actions[0].clone();
        let Some(completer) = &self.completer else {
            return fallback;
        };

        let prompt = build_action_prompt(goal, &self.actions);
        let response = match completer.complete(&[Message::user(prompt)]).await {
            Ok(response) => response,
            Err(err) => {
                debug!("action selection failed, using first action: {}", err);
                return fallback;
            }
        };

        let parsed: Option<ActionChoice> = extract_json_object(&response.content)
            .and_then(|json| serde_json::from_str(json).ok());
        let Some(choice) = parsed else {
            return fallback;
        };
        let Some(declared) = self.actions.iter().find(|a| a.name == choice.action) else {
            return fallback;
        };

        // LLM-supplied parameters are merged over the action's declared
        // defaults.
        let mut action = declared.clone();
        for (key, value) in choice.parameters {
            action.parameters.insert(key, value);
        }
        action
    }
}

#[async_trait]
impl Planner for ActionPlanner {
    fn name(&self) -> &str {
        "action"
    }

    async fn plan(&self, goal: &str, opts: &PlanOptions) -> Result<Plan> {
        if self.actions.is_empty() {
            return Err(Error::MissingConfig("action planner has no actions".to_string()));
        }
        let action = self.select(goal).await;
        let mut plan = Plan::new(goal);
        plan.metadata = opts.metadata.clone();
        let description = if action.description.is_empty() {
            action.name.clone()
        } else {
            action.description.clone()
        };
        plan.push_step(description, action);
        Ok(plan)
    }

    async fn replan(&self, plan: &Plan, feedback: &str) -> Result<Plan> {
        let goal = format!("{}\n\nFeedback on the previous attempt: {}", plan.goal, feedback);
        let mut revised = self.plan(&goal, &PlanOptions::default()).await?;
        revised.id = plan.id.clone();
        revised.goal = plan.goal.clone();
        Ok(revised)
    }
}

// ── Prompt assembly ───────────────────────────────────────────────────────

fn build_plan_prompt(goal: &str, tools: &[ToolMetadata]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a planning assistant. Decompose the goal into ordered steps.\n\n");
    prompt.push_str(&format!("GOAL: {}\n", goal));

    if !tools.is_empty() {
        prompt.push_str("\nAVAILABLE TOOLS:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }

    prompt.push_str(
        "\nRespond with EXACTLY this JSON structure:\n\
         {\"steps\": [{\"description\": \"...\", \"action\": {\"type\": \"tool\", \
         \"name\": \"...\", \"parameters\": {}}, \"dependencies\": []}]}\n\n\
         Valid action types: tool, agent, llm, function, subplan.\n\
         Dependencies reference earlier step ids such as \"step-1\".\n",
    );
    prompt
}

fn build_replan_prompt(plan: &Plan, feedback: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are revising a plan that is partially complete.\n\n");
    prompt.push_str(&format!("GOAL: {}\n", plan.goal));

    let completed = plan.completed_steps();
    if !completed.is_empty() {
        prompt.push_str("\nCOMPLETED STEPS (do not repeat these):\n");
        for step in completed {
            prompt.push_str(&format!("- [{}] {}\n", step.id, step.description));
        }
    }

    prompt.push_str(&format!("\nFEEDBACK: {}\n", feedback));
    prompt.push_str(
        "\nRespond with the remaining steps in EXACTLY this JSON structure:\n\
         {\"steps\": [{\"description\": \"...\", \"action\": {\"type\": \"tool\", \
         \"name\": \"...\", \"parameters\": {}}, \"dependencies\": []}]}\n",
    );
    prompt
}

fn build_next_step_prompt(plan: &Plan, last_result: Option<&StepResult>) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are planning one step at a time.\n\n");
    prompt.push_str(&format!("GOAL: {}\n", plan.goal));

    if let Some(feedback) = plan.metadata.get("feedback").and_then(Value::as_str) {
        prompt.push_str(&format!("\nFEEDBACK: {}\n", feedback));
    }

    if !plan.steps.is_empty() {
        prompt.push_str("\nSTEPS SO FAR:\n");
        for step in &plan.steps {
            let marker = match step.state {
                StepState::Completed => "done",
                StepState::Failed => "failed",
                _ => "planned",
            };
            prompt.push_str(&format!("- [{}] ({}) {}\n", step.id, marker, step.description));
        }
    }

    if let Some(result) = last_result {
        if result.success {
            prompt.push_str(&format!("\nLAST RESULT: success: {}\n", result.output));
        } else {
            prompt.push_str(&format!(
                "\nLAST RESULT: failure: {}\n",
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    prompt.push_str(
        "\nIf the goal is achieved respond with {\"done\": true}. Otherwise respond with:\n\
         {\"done\": false, \"step\": {\"description\": \"...\", \"action\": \
         {\"type\": \"tool\", \"name\": \"...\", \"parameters\": {}}, \"dependencies\": []}}\n",
    );
    prompt
}

fn build_action_prompt(goal: &str, actions: &[Action]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Select the single best action for the goal.\n\n");
    prompt.push_str(&format!("GOAL: {}\n\nACTIONS:\n", goal));
    for action in actions {
        prompt.push_str(&format!("- {}: {}\n", action.name, action.description));
    }
    prompt.push_str(
        "\nRespond with EXACTLY this JSON structure:\n\
         {\"action\": \"name\", \"parameters\": {}}\n",
    );
    prompt
}

// ── Response parsing ──────────────────────────────────────────────────────

/// Extract the outermost `{...}` substring so prose wrappers around the
/// JSON do not break decoding.
fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&response[start..=end])
}

#[derive(Deserialize)]
struct PlannedSteps {
    steps: Vec<PlannedStep>,
}

#[derive(Deserialize)]
struct PlannedStep {
    description: String,
    action: PlannedAction,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct PlannedAction {
    #[serde(rename = "type")]
    action_type: ActionType,
    name: String,
    #[serde(default)]
    parameters: HashMap<String, Value>,
    #[serde(default)]
    description: String,
}

impl PlannedAction {
    fn into_action(self) -> Action {
        Action {
            action_type: self.action_type,
            name: self.name,
            parameters: self.parameters,
            description: self.description,
        }
    }
}

#[derive(Deserialize)]
struct NextStepResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    step: Option<PlannedStep>,
}

#[derive(Deserialize)]
struct ActionChoice {
    action: String,
    #[serde(default)]
    parameters: HashMap<String, Value>,
}

fn parse_steps(response: &str) -> Option<Vec<PlannedStep>> {
    let json = extract_json_object(response)?;
    let parsed: PlannedSteps = serde_json::from_str(json).ok()?;
    Some(parsed.steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_extraction_tolerates_prose() {
        let response = "Sure! Here is the plan:\n{\"steps\": []}\nLet me know.";
        assert_eq!(extract_json_object(response), Some("{\"steps\": []}"));
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
    }

    #[test]
    fn step_parsing_reads_actions_and_dependencies() {
        let response = r#"{"steps":[{"description":"d1","action":{"type":"tool","name":"t1"},"dependencies":["step-0"]}]}"#;
        let steps = parse_steps(response).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action.name, "t1");
        assert_eq!(steps[0].dependencies, vec!["step-0".to_string()]);
    }

    #[test]
    fn malformed_step_lists_parse_to_none() {
        assert!(parse_steps("{\"steps\": \"oops\"}").is_none());
        assert!(parse_steps("plain text").is_none());
    }
}
