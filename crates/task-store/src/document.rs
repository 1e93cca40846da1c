use serde::{Deserialize, Serialize};
use waypoint_core_types::{ActionRecord, CorrectionRecord, Task, TaskId};

use crate::StoreError;

/// Everything persisted for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub corrections: Vec<CorrectionRecord>,
}

impl TaskDocument {
    pub fn stored_version(&self) -> u64 {
        self.task.as_ref().map(|task| task.version).unwrap_or(0)
    }

    pub fn apply_put(&mut self, mut task: Task) -> Result<Task, StoreError> {
        let stored = self.stored_version();
        if task.version != stored {
            return Err(StoreError::VersionConflict {
                task_id: task.id.clone(),
                stored,
                given: task.version,
            });
        }
        task.version = stored + 1;
        task.touch();
        self.task = Some(task.clone());
        Ok(task)
    }

    pub fn apply_action(&mut self, record: ActionRecord) -> Result<(), StoreError> {
        if let Some(last) = self.actions.last() {
            if record.step_index <= last.step_index {
                return Err(StoreError::DuplicateStepIndex {
                    task_id: record.task_id,
                    step_index: record.step_index,
                    last: last.step_index,
                });
            }
        }
        self.actions.push(record);
        Ok(())
    }

    pub fn apply_correction(&mut self, record: CorrectionRecord) -> Result<(), StoreError> {
        let last = self
            .corrections
            .iter()
            .filter(|existing| existing.step_index == record.step_index)
            .map(|existing| existing.attempt)
            .max()
            .unwrap_or(0);
        if record.attempt <= last {
            return Err(StoreError::NonMonotonicAttempt {
                task_id: record.task_id,
                step_index: record.step_index,
                attempt: record.attempt,
                last,
            });
        }
        if let Some(task) = &self.task {
            if record.attempt > task.max_retries_per_step {
                return Err(StoreError::RetryBudgetExceeded {
                    task_id: record.task_id,
                    step_index: record.step_index,
                    attempt: record.attempt,
                    max: task.max_retries_per_step,
                });
            }
        }
        self.corrections.push(record);
        Ok(())
    }

    /// Version check plus appends on a staged copy; the document only changes
    /// when every part is accepted.
    pub fn apply_commit(
        &mut self,
        task: Task,
        action: Option<ActionRecord>,
        correction: Option<CorrectionRecord>,
    ) -> Result<Task, StoreError> {
        let mut staged = self.clone();
        let stored = staged.apply_put(task)?;
        if let Some(record) = correction {
            staged.apply_correction(record)?;
        }
        if let Some(record) = action {
            staged.apply_action(record)?;
        }
        *self = staged;
        Ok(stored)
    }

    pub fn corrections_for(&self, step_index: Option<u32>) -> Vec<CorrectionRecord> {
        self.corrections
            .iter()
            .filter(|record| step_index.map_or(true, |step| record.step_index == step))
            .cloned()
            .collect()
    }

    pub fn require_task(&self, id: &TaskId) -> Result<&Task, StoreError> {
        self.task
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
