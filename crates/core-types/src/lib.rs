//! Persisted task model for the Waypoint decision core.
//!
//! Everything in this crate is plain data: the decision engine mutates these
//! types through explicit transition functions and the task store persists
//! them as documents.

mod plan;
mod records;
mod task;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use plan::{
    HierarchicalPlan, InputSource, Plan, PlanStep, StepStatus, SubTask, SubTaskInput,
    SubTaskOutput, SubTaskStatus, ToolType,
};
pub use records::{
    ActionRecord, ActionType, BeforeState, CorrectionRecord, CorrectionStrategy, DomChange,
    ExpectedOutcome, VerificationResult, VerificationTier,
};
pub use task::{Task, TaskComplexity, TaskMetrics, TaskStatus, DEFAULT_MAX_RETRIES_PER_STEP};

/// Error raised when a status value cannot be moved along its lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("step {index} cannot move from {from:?} to {to:?}")]
    Step {
        index: u32,
        from: StepStatus,
        to: StepStatus,
    },
    #[error("task is terminal ({0:?})")]
    TerminalTask(TaskStatus),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
