//! Wire types for one decision cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use waypoint_core_types::{
    ActionType, CorrectionStrategy, ExpectedOutcome, PlanStep, SubTask, Task, TaskId, TaskStatus,
};
use waypoint_task_store::validate_task_id;

use crate::errors::AgentError;
use crate::verification::RoutedVerification;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Full (possibly trimmed) markup.
    #[default]
    Full,
    /// Indexed interactive-element listing such as `[3]<a href="/x">About</a>`.
    Structural,
}

/// Page state as observed by the actuator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRepresentation {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub kind: PageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused_element: Option<String>,
}

impl PageRepresentation {
    pub fn new(content: impl Into<String>, kind: PageKind) -> Self {
        Self {
            content: content.into(),
            kind,
            summary: None,
            focused_element: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Summary when present, otherwise the head of the content.
    pub fn describe(&self, max_chars: usize) -> String {
        match &self.summary {
            Some(summary) if !summary.trim().is_empty() => summary.clone(),
            _ => self.content.chars().take(max_chars).collect(),
        }
    }
}

/// Actuator's report on the previously issued action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events the client saw while the action ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessedChanges {
    pub url_changed: bool,
    pub dom_mutated: bool,
    pub network_activity: bool,
}

impl WitnessedChanges {
    pub fn any(&self) -> bool {
        self.url_changed || self.dom_mutated || self.network_activity
    }

    pub fn describe(&self) -> String {
        let mut seen = Vec::new();
        if self.url_changed {
            seen.push("url change");
        }
        if self.dom_mutated {
            seen.push("DOM mutation");
        }
        if self.network_activity {
            seen.push("network activity");
        }
        if seen.is_empty() {
            "no client events".to_string()
        } else {
            seen.join(", ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Ranked snippet the caller already retrieved for the goal/URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchBudget {
    pub allow_web_search: bool,
    pub remaining_searches: u32,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            allow_web_search: true,
            remaining_searches: 3,
        }
    }
}

impl SearchBudget {
    pub fn can_search(&self) -> bool {
        self.allow_web_search && self.remaining_searches > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub current_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_url: Option<String>,
    #[serde(default)]
    pub page: PageRepresentation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionOutcome>,
    #[serde(default)]
    pub witnessed: WitnessedChanges,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default)]
    pub knowledge: Vec<KnowledgeSnippet>,
    #[serde(default)]
    pub search_budget: SearchBudget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries_per_step: Option<u32>,
}

impl StepRequest {
    pub fn new(goal: impl Into<String>, current_url: impl Into<String>) -> Self {
        Self {
            task_id: None,
            step_index: None,
            goal: goal.into(),
            target_url: None,
            current_url: current_url.into(),
            previous_url: None,
            page: PageRepresentation::default(),
            execution: None,
            witnessed: WitnessedChanges::default(),
            chat_history: Vec::new(),
            user_message: None,
            knowledge: Vec::new(),
            search_budget: SearchBudget::default(),
            max_retries_per_step: None,
        }
    }

    pub fn with_task(mut self, task_id: TaskId, step_index: u32) -> Self {
        self.task_id = Some(task_id);
        self.step_index = Some(step_index);
        self
    }

    pub fn with_page(mut self, page: PageRepresentation) -> Self {
        self.page = page;
        self
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_witnessed(mut self, witnessed: WitnessedChanges) -> Self {
        self.witnessed = witnessed;
        self
    }

    pub fn with_execution(mut self, success: bool, error: Option<String>) -> Self {
        self.execution = Some(ExecutionOutcome { success, error });
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn with_search_budget(mut self, budget: SearchBudget) -> Self {
        self.search_budget = budget;
        self
    }

    /// Rejects malformed requests before any state is touched.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.goal.trim().is_empty() {
            return Err(AgentError::validation("goal cannot be empty"));
        }
        if self.current_url.trim().is_empty() {
            return Err(AgentError::validation("current_url cannot be empty"));
        }
        url::Url::parse(self.current_url.trim()).map_err(|err| {
            AgentError::validation(format!("current_url '{}' is invalid: {err}", self.current_url))
        })?;
        if let Some(target) = &self.target_url {
            url::Url::parse(target.trim()).map_err(|err| {
                AgentError::validation(format!("target_url '{target}' is invalid: {err}"))
            })?;
        }
        if let Some(task_id) = &self.task_id {
            validate_task_id(task_id).map_err(AgentError::from)?;
        }
        if self.step_index.is_some() && self.task_id.is_none() {
            return Err(AgentError::validation("step_index requires task_id"));
        }
        if self.max_retries_per_step == Some(0) {
            return Err(AgentError::validation("max_retries_per_step must be positive"));
        }
        if self
            .knowledge
            .iter()
            .any(|snippet| !snippet.score.is_finite())
        {
            return Err(AgentError::validation("knowledge scores must be finite"));
        }
        Ok(())
    }
}

/// Plan state returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub steps: Vec<PlanStep>,
    pub current_step_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<SubTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sub_task: Option<usize>,
    #[serde(default)]
    pub is_decomposed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accumulated_outputs: BTreeMap<String, String>,
}

impl PlanSnapshot {
    pub fn of(task: &Task) -> Option<Self> {
        let plan = task.plan.as_ref()?;
        let hierarchy = task.hierarchy.as_ref();
        Some(Self {
            steps: plan.steps.clone(),
            current_step_index: plan.current_step_index,
            sub_tasks: hierarchy.map(|h| h.sub_tasks.clone()).unwrap_or_default(),
            current_sub_task: hierarchy.map(|h| h.current_sub_task),
            is_decomposed: hierarchy.map(|h| h.is_decomposed).unwrap_or(false),
            accumulated_outputs: hierarchy
                .map(|h| h.accumulated_outputs.clone())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSummary {
    pub strategy: CorrectionStrategy,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<ExpectedOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<RoutedVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSnapshot>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<CorrectionSummary>,
    #[serde(default)]
    pub critic_overridden: bool,
}

impl StepResponse {
    /// Response carrying no action, reflecting the task as stored.
    pub fn idle(task: &Task, thought: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            step_index: None,
            thought: thought.into(),
            action: None,
            action_type: None,
            expected_outcome: None,
            verification: None,
            plan: PlanSnapshot::of(task),
            status: task.status,
            clarification: task.pending_clarification.clone(),
            correction: None,
            critic_overridden: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_request_deserializes_with_defaults() {
        let request: StepRequest = serde_json::from_str(
            r#"{"goal":"find the opening hours","current_url":"https://example.com"}"#,
        )
        .unwrap();
        assert!(request.task_id.is_none());
        assert_eq!(request.page.kind, PageKind::Full);
        assert!(request.search_budget.can_search());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validation_rejects_before_anything_else() {
        let err = StepRequest::new("  ", "https://example.com").validate().unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        let err = StepRequest::new("goal", "not a url").validate().unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        let mut request = StepRequest::new("goal", "https://example.com");
        request.task_id = Some(TaskId::from("../../etc"));
        assert!(matches!(request.validate(), Err(AgentError::Validation(_))));
    }

    #[test]
    fn witnessed_changes_describe() {
        let witnessed = WitnessedChanges {
            dom_mutated: true,
            ..Default::default()
        };
        assert!(witnessed.any());
        assert_eq!(witnessed.describe(), "DOM mutation");
    }
}
