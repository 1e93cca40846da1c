//! Direct action generation and the prompt context shared with the step
//! refiner.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use waypoint_core_types::PlanStep;

use crate::errors::AgentError;
use crate::grammar::{parse_action, ParsedAction};
use crate::interrupt::has_missing_info;
use crate::prompt::{format_notes, truncate_chars, ACTION_GRAMMAR_HELP, GENERATOR_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::request::{ChatTurn, KnowledgeSnippet, PageRepresentation};
use crate::structured::{parse_structured, preview};

/// Everything a generation prompt may draw on.
#[derive(Debug, Clone)]
pub struct ActionContext<'a> {
    pub goal: &'a str,
    pub current_url: &'a str,
    pub page: &'a PageRepresentation,
    pub step: Option<&'a PlanStep>,
    /// Current sub-task goal and accumulated outputs.
    pub sub_task_context: String,
    pub notes: &'a [String],
    pub knowledge: &'a [KnowledgeSnippet],
    pub chat_history: &'a [ChatTurn],
    /// Why the previous attempt failed, or what the critic objected to.
    pub feedback: Option<String>,
    /// Set when a low-confidence completion must be confirmed.
    pub confirm_completion: bool,
    pub max_page_chars: usize,
}

impl<'a> ActionContext<'a> {
    pub fn new(goal: &'a str, current_url: &'a str, page: &'a PageRepresentation) -> Self {
        Self {
            goal,
            current_url,
            page,
            step: None,
            sub_task_context: String::new(),
            notes: Default::default(),
            knowledge: Default::default(),
            chat_history: Default::default(),
            feedback: None,
            confirm_completion: false,
            max_page_chars: 12_000,
        }
    }

    pub fn with_feedback(&self, feedback: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.feedback = Some(feedback.into());
        next
    }

    pub fn render(&self) -> String {
        let mut prompt = format!("Goal: {}\nCurrent URL: {}\n", self.goal, self.current_url);
        if !self.sub_task_context.is_empty() {
            prompt.push_str(&self.sub_task_context);
            if !self.sub_task_context.ends_with('\n') {
                prompt.push('\n');
            }
        }
        if let Some(step) = self.step {
            prompt.push_str(&format!("Current step [{}]: {}\n", step.index, step.description));
            if let Some(expected) = &step.expected_outcome {
                prompt.push_str(&format!("Step should lead to: {expected}\n"));
            }
        }
        prompt.push_str(&format_notes(self.notes));
        if !self.knowledge.is_empty() {
            prompt.push_str("Known snippets:\n");
            for snippet in self.knowledge.iter().take(5) {
                prompt.push_str(&format!("- {}\n", snippet.text));
            }
        }
        if !self.chat_history.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in self.chat_history.iter().rev().take(6).rev() {
                prompt.push_str(&format!("- {:?}: {}\n", turn.role, turn.content));
            }
        }
        if let Some(feedback) = &self.feedback {
            prompt.push_str(&format!("Previous attempt failed: {feedback}\n"));
        }
        if self.confirm_completion {
            prompt.push_str(
                "The goal may already be achieved but the check was not confident. Confirm on the page before answering finish().\n",
            );
        }
        if let Some(focused) = &self.page.focused_element {
            prompt.push_str(&format!("Focused element: {focused}\n"));
        }
        prompt.push_str("Page:\n");
        prompt.push_str(&truncate_chars(&self.page.content, self.max_page_chars));
        prompt
    }
}

/// One candidate action. `action` is `None` only when the output named
/// missing information instead of acting.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAction {
    pub thought: String,
    pub action: Option<ParsedAction>,
    /// Raw provider text, scanned for missing-information markers.
    pub raw: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct GeneratorResponse {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub action: String,
}

/// Turns a thought/action pair into a candidate, rejecting ungrammatical
/// actions and empty ones that do not name missing information.
pub fn candidate_from(thought: String, action: &str, raw: String) -> Result<GeneratedAction, AgentError> {
    if action.trim().is_empty() {
        if has_missing_info(&raw) {
            return Ok(GeneratedAction {
                thought,
                action: None,
                raw,
            });
        }
        return Err(AgentError::validation(format!(
            "generation produced no action: {}",
            preview(&raw)
        )));
    }
    let parsed = parse_action(action)?;
    Ok(GeneratedAction {
        thought,
        action: Some(parsed),
        raw,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ActionGenerator;

impl ActionGenerator {
    pub fn new() -> Self {
        Self
    }

    pub async fn generate(
        &self,
        context: &ActionContext<'_>,
        generator: &dyn TextGenerator,
    ) -> Result<GeneratedAction, AgentError> {
        let system = format!("{GENERATOR_SYSTEM_PROMPT}\n\n{ACTION_GRAMMAR_HELP}");
        let request = GenerationRequest::new(CallPurpose::ActionGeneration, system, context.render())
            .with_schema(ResponseSchema::of::<GeneratorResponse>("action"))
            .with_temperature(0.3);
        let generation = generator.generate(request).await?;
        let raw = generation.text;
        let response = match parse_structured::<GeneratorResponse>(&raw) {
            Ok(response) => response,
            Err(err) if has_missing_info(&raw) => {
                debug!(target: "generate", error = %err, "unstructured output names missing information");
                GeneratorResponse {
                    thought: raw.trim().to_string(),
                    action: String::new(),
                }
            }
            Err(err) => return Err(err),
        };
        candidate_from(response.thought, &response.action, raw)
    }
}
