//! Task store port for the Waypoint decision core.
//!
//! A store keeps one document per task: the task snapshot plus its append-only
//! action and correction logs. Both backends enforce the same contract:
//!
//! * `put` succeeds only when the stored version equals `task.version`
//!   (a missing task counts as version 0) and returns the task with the version
//!   bumped by one;
//! * action records carry a strictly increasing `step_index` per task;
//! * correction attempts are strictly increasing per (task, plan step) and never
//!   exceed the task's retry budget;
//! * `commit` applies a snapshot and its records as one unit: a rejected
//!   commit leaves the document untouched.

mod document;
mod file;
mod memory;

use async_trait::async_trait;
use thiserror::Error;
use waypoint_core_types::{ActionRecord, CorrectionRecord, Task, TaskId};

pub use document::TaskDocument;
pub use file::JsonFileTaskStore;
pub use memory::InMemoryTaskStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("invalid task id '{0}'")]
    InvalidTaskId(String),
    #[error("version conflict for task {task_id}: stored {stored}, given {given}")]
    VersionConflict {
        task_id: TaskId,
        stored: u64,
        given: u64,
    },
    #[error("step index {step_index} for task {task_id} is not after {last}")]
    DuplicateStepIndex {
        task_id: TaskId,
        step_index: u32,
        last: u32,
    },
    #[error("correction attempt {attempt} for task {task_id} step {step_index} is not after {last}")]
    NonMonotonicAttempt {
        task_id: TaskId,
        step_index: u32,
        attempt: u32,
        last: u32,
    },
    #[error("correction attempt {attempt} for task {task_id} step {step_index} exceeds budget {max}")]
    RetryBudgetExceeded {
        task_id: TaskId,
        step_index: u32,
        attempt: u32,
        max: u32,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Optimistic write. Returns the stored snapshot with its new version.
    async fn put(&self, task: Task) -> Result<Task, StoreError>;

    async fn append_action_record(&self, record: ActionRecord) -> Result<(), StoreError>;

    async fn append_correction_record(&self, record: CorrectionRecord) -> Result<(), StoreError>;

    /// Versioned write of a task snapshot together with the records produced
    /// in the same decision cycle. All or nothing.
    async fn commit(
        &self,
        task: Task,
        action: Option<ActionRecord>,
        correction: Option<CorrectionRecord>,
    ) -> Result<Task, StoreError>;

    async fn action_records(&self, id: &TaskId) -> Result<Vec<ActionRecord>, StoreError>;

    /// Correction log for a task, optionally narrowed to one plan step.
    async fn correction_records(
        &self,
        id: &TaskId,
        step_index: Option<u32>,
    ) -> Result<Vec<CorrectionRecord>, StoreError>;

    async fn last_action_record(&self, id: &TaskId) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self.action_records(id).await?.pop())
    }
}

/// Task ids end up in file names, so only a conservative alphabet is allowed.
pub fn validate_task_id(id: &TaskId) -> Result<(), StoreError> {
    let raw = id.as_str();
    let ok = !raw.is_empty()
        && raw.len() <= 128
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidTaskId(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_alphabet() {
        assert!(validate_task_id(&TaskId::new()).is_ok());
        assert!(validate_task_id(&TaskId::from("task_01-a")).is_ok());
        assert!(validate_task_id(&TaskId::from("../etc/passwd")).is_err());
        assert!(validate_task_id(&TaskId::from("")).is_err());
    }
}
