use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HierarchicalPlan, Plan, PlanStep, TaskId, TransitionError, VerificationResult};

pub const DEFAULT_MAX_RETRIES_PER_STEP: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Created,
    Planning,
    Executing,
    Correcting,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Correcting => "correcting",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskComplexity {
    #[default]
    Simple,
    Complex,
}

/// Aggregate counters kept on the task document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetrics {
    pub actions_issued: u32,
    pub provider_calls: u32,
    pub provider_failures: u32,
    pub deterministic_verdicts: u32,
    pub lightweight_verdicts: u32,
    pub full_verdicts: u32,
    pub corrections_accepted: u32,
    pub corrections_rejected: u32,
    pub low_confidence_completions: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Bumped by every successful store `put`.
    #[serde(default)]
    pub version: u64,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub complexity: TaskComplexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchicalPlan>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_step: u32,
    /// Step index the next ActionRecord will carry.
    #[serde(default)]
    pub next_step_index: u32,
    /// Step index of the single ActionRecord whose outcome is still unverified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_verification: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<VerificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_clarification: Option<String>,
    /// Set when a low-confidence completion must be confirmed before `finish()`.
    #[serde(default)]
    pub pending_confirmation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metrics: TaskMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES_PER_STEP
}

impl Task {
    pub fn new(goal: impl Into<String>, target_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            version: 0,
            goal: goal.into(),
            target_url,
            status: TaskStatus::Created,
            complexity: TaskComplexity::Simple,
            plan: None,
            hierarchy: None,
            consecutive_failures: 0,
            max_retries_per_step: DEFAULT_MAX_RETRIES_PER_STEP,
            next_step_index: 0,
            awaiting_verification: None,
            last_verification: None,
            pending_clarification: None,
            pending_confirmation: false,
            context_notes: Vec::new(),
            failure_reason: None,
            metrics: TaskMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_step = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Errors when the task can no longer be mutated.
    pub fn ensure_active(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            Err(TransitionError::TerminalTask(self.status))
        } else {
            Ok(())
        }
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.as_ref().and_then(Plan::current_step)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults() {
        let task = Task::new("book a table", Some("https://example.com".into()));
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.version, 0);
        assert_eq!(task.max_retries_per_step, DEFAULT_MAX_RETRIES_PER_STEP);
        assert!(task.current_step().is_none());
        assert!(task.ensure_active().is_ok());
    }

    #[test]
    fn terminal_task_rejects_mutation() {
        let mut task = Task::new("x", None);
        task.status = TaskStatus::Failed;
        assert_eq!(
            task.ensure_active(),
            Err(TransitionError::TerminalTask(TaskStatus::Failed))
        );
    }

    #[test]
    fn missing_retry_budget_defaults_on_deserialize() {
        let task = Task::new("x", None);
        let mut value = serde_json::to_value(&task).unwrap();
        value.as_object_mut().unwrap().remove("max_retries_per_step");
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.max_retries_per_step, 3);
        assert_eq!(back.status, TaskStatus::Created);
    }
}
