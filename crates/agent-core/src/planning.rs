use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use waypoint_core_types::{Plan, PlanStep, ToolType};

use crate::atomic::atomize_plan;
use crate::errors::AgentError;
use crate::prompt::{truncate_chars, PLANNER_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, alias = "tool_type")]
    pub tool_type: Option<String>,
    #[serde(default, alias = "expected_outcome")]
    pub expected_outcome: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanResponse {
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
}

/// What the planner knows about the task when it is called.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext<'a> {
    pub goal: &'a str,
    pub current_url: &'a str,
    pub target_url: Option<&'a str>,
    pub page_summary: &'a str,
    pub notes: &'a [String],
}

/// Orders by index, drops empty steps and re-indexes `0..n`.
pub fn normalize_steps(mut planned: Vec<PlannedStep>) -> Vec<PlanStep> {
    planned.sort_by_key(|step| step.index.unwrap_or(u32::MAX));
    planned
        .into_iter()
        .filter(|step| !step.description.trim().is_empty())
        .enumerate()
        .map(|(index, step)| {
            let mut plan_step = PlanStep::new(index as u32, step.description.trim())
                .with_reasoning(step.reasoning)
                .with_tool_type(
                    step.tool_type
                        .as_deref()
                        .map(ToolType::parse_lenient)
                        .unwrap_or_default(),
                );
            plan_step.expected_outcome = step.expected_outcome.filter(|o| !o.trim().is_empty());
            plan_step
        })
        .collect()
}

/// One step: the goal itself.
pub fn fallback_plan(goal: &str) -> Plan {
    Plan::new(vec![
        PlanStep::new(0, goal.trim()).with_reasoning("planner unavailable; acting on the goal directly")
    ])
}

#[derive(Debug, Clone, Default)]
pub struct PlanningEngine;

impl PlanningEngine {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: provider or parse errors produce the single-step fallback.
    pub async fn create_plan(
        &self,
        context: &PlanningContext<'_>,
        generator: &dyn TextGenerator,
    ) -> Plan {
        match self.request_plan(context, generator).await {
            Ok(steps) if !steps.is_empty() => {
                let steps = atomize_plan(steps);
                info!(target: "planning", steps = steps.len(), "plan created");
                Plan::new(steps)
            }
            Ok(_) => {
                warn!(target: "planning", "planner returned no usable steps; using fallback plan");
                fallback_plan(context.goal)
            }
            Err(err) => {
                warn!(target: "planning", kind = err.kind(), error = %err, "planner failed; using fallback plan");
                fallback_plan(context.goal)
            }
        }
    }

    async fn request_plan(
        &self,
        context: &PlanningContext<'_>,
        generator: &dyn TextGenerator,
    ) -> Result<Vec<PlanStep>, AgentError> {
        let mut prompt = format!("Goal: {}\nCurrent URL: {}\n", context.goal, context.current_url);
        if let Some(target) = context.target_url {
            prompt.push_str(&format!("Target site: {target}\n"));
        }
        if !context.notes.is_empty() {
            prompt.push_str(&crate::prompt::format_notes(context.notes));
        }
        if !context.page_summary.is_empty() {
            prompt.push_str("Page:\n");
            prompt.push_str(&truncate_chars(context.page_summary, 4_000));
        }
        let request = GenerationRequest::new(CallPurpose::Planning, PLANNER_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<PlanResponse>("plan"))
            .with_temperature(0.2);
        let response: PlanResponse = generate_structured(generator, request).await?;
        Ok(normalize_steps(response.steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::MockTextGenerator;
    use waypoint_core_types::StepStatus;

    fn context() -> PlanningContext<'static> {
        PlanningContext {
            goal: "log in",
            current_url: "https://a.com",
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn steps_are_sorted_filtered_and_atomized() {
        let mock = MockTextGenerator::new();
        mock.push(
            CallPurpose::Planning,
            r#"{"steps":[
                {"index":2,"description":"Type password and click Sign in","toolType":"dom"},
                {"index":0,"description":"Open the login page","toolType":"DOM"},
                {"index":1,"description":"   "}
            ]}"#,
        );
        let plan = PlanningEngine::new().create_plan(&context(), &mock).await;
        let descriptions: Vec<&str> = plan.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Open the login page", "password", "Click Sign in"]);
        assert_eq!(plan.steps[2].index, 2);
        assert_eq!(plan.steps[0].status, StepStatus::Active);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_goal() {
        let mock = MockTextGenerator::new();
        mock.push_error(CallPurpose::Planning, ProviderError::Timeout("30s".into()));
        let plan = PlanningEngine::new().create_plan(&context(), &mock).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].description, "log in");
    }

    #[tokio::test]
    async fn empty_plan_falls_back_to_goal() {
        let mock = MockTextGenerator::new();
        mock.push(CallPurpose::Planning, r#"{"steps":[]}"#);
        let plan = PlanningEngine::new().create_plan(&context(), &mock).await;
        assert_eq!(plan.len(), 1);
    }
}
