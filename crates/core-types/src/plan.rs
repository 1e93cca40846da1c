use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::TransitionError;

/// Where a plan step is expected to execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolType {
    /// Browser-side interaction with the page.
    #[default]
    Dom,
    /// Work answered without touching the page (lookups, search, memory).
    Server,
    /// Needs both.
    Mixed,
}

impl ToolType {
    /// Lenient parse used for provider output.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SERVER" => ToolType::Server,
            "MIXED" => ToolType::Mixed,
            _ => ToolType::Dom,
        }
    }
}

/// Lifecycle of a single plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl StepStatus {
    /// `pending -> active -> completed|failed`. Re-activation of an active or
    /// failed step is only allowed through [`PlanStep::reactivate`].
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Active)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Active, StepStatus::Completed)
                | (StepStatus::Active, StepStatus::Failed)
        )
    }

    pub fn is_done(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: u32,
    pub description: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tool_type: ToolType,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

impl PlanStep {
    pub fn new(index: u32, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            reasoning: String::new(),
            tool_type: ToolType::Dom,
            status: StepStatus::Pending,
            expected_outcome: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_tool_type(mut self, tool_type: ToolType) -> Self {
        self.tool_type = tool_type;
        self
    }

    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = Some(outcome.into());
        self
    }

    pub fn transition(&mut self, next: StepStatus) -> Result<(), TransitionError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Step {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Puts the step back into `active` with a corrected description.
    pub fn reactivate(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.status = StepStatus::Active;
    }
}

/// Flat ordered plan with a single cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub current_step_index: usize,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        let mut plan = Self {
            steps,
            current_step_index: 0,
        };
        if let Some(first) = plan.steps.first_mut() {
            if first.status == StepStatus::Pending {
                first.status = StepStatus::Active;
            }
        }
        plan
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps.get_mut(self.current_step_index)
    }

    pub fn step(&self, index: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.index == index)
    }

    pub fn next_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index + 1)
    }

    /// True once the cursor has moved past the final step.
    pub fn is_exhausted(&self) -> bool {
        self.current_step_index >= self.steps.len()
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

/// Where a declared sub-task input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InputSource {
    User,
    SubTask(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskInput {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskOutput {
    pub name: String,
    #[serde(default)]
    pub extraction_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub goal: String,
    /// Indices of the flat plan steps owned by this sub-task, in order.
    pub step_indices: Vec<u32>,
    #[serde(default)]
    pub inputs: Vec<SubTaskInput>,
    #[serde(default)]
    pub outputs: Vec<SubTaskOutput>,
    #[serde(default)]
    pub status: SubTaskStatus,
}

impl SubTask {
    pub fn owns_step(&self, index: u32) -> bool {
        self.step_indices.contains(&index)
    }

    pub fn last_step_index(&self) -> Option<u32> {
        self.step_indices.last().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalPlan {
    pub goal: String,
    #[serde(default)]
    pub is_decomposed: bool,
    pub sub_tasks: Vec<SubTask>,
    #[serde(default)]
    pub current_sub_task: usize,
    /// Only state handed from one sub-task context to the next.
    #[serde(default)]
    pub accumulated_outputs: BTreeMap<String, String>,
}

impl HierarchicalPlan {
    pub fn current(&self) -> Option<&SubTask> {
        self.sub_tasks.get(self.current_sub_task)
    }

    pub fn current_mut(&mut self) -> Option<&mut SubTask> {
        self.sub_tasks.get_mut(self.current_sub_task)
    }

    pub fn sub_task_for_step(&self, index: u32) -> Option<&SubTask> {
        self.sub_tasks.iter().find(|sub| sub.owns_step(index))
    }
}
