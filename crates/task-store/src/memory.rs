use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use waypoint_core_types::{ActionRecord, CorrectionRecord, Task, TaskId};

use crate::{validate_task_id, StoreError, TaskDocument, TaskStore};

/// Process-local store. Each document is mutated under its DashMap shard lock,
/// so the version check and the write are atomic.
#[derive(Default)]
pub struct InMemoryTaskStore {
    documents: DashMap<TaskId, TaskDocument>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.value().task.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self
            .documents
            .get(id)
            .and_then(|doc| doc.value().task.clone()))
    }

    async fn put(&self, task: Task) -> Result<Task, StoreError> {
        validate_task_id(&task.id)?;
        let mut doc = self.documents.entry(task.id.clone()).or_default();
        let stored = doc.apply_put(task)?;
        debug!(target: "task_store", task_id = %stored.id, version = stored.version, "task stored");
        Ok(stored)
    }

    async fn append_action_record(&self, record: ActionRecord) -> Result<(), StoreError> {
        validate_task_id(&record.task_id)?;
        let mut doc = self.documents.entry(record.task_id.clone()).or_default();
        doc.apply_action(record)
    }

    async fn append_correction_record(&self, record: CorrectionRecord) -> Result<(), StoreError> {
        validate_task_id(&record.task_id)?;
        let mut doc = self.documents.entry(record.task_id.clone()).or_default();
        doc.apply_correction(record)
    }

    async fn commit(
        &self,
        task: Task,
        action: Option<ActionRecord>,
        correction: Option<CorrectionRecord>,
    ) -> Result<Task, StoreError> {
        validate_task_id(&task.id)?;
        let mut doc = self.documents.entry(task.id.clone()).or_default();
        let stored = doc.apply_commit(task, action, correction)?;
        debug!(target: "task_store", task_id = %stored.id, version = stored.version, "task committed");
        Ok(stored)
    }

    async fn action_records(&self, id: &TaskId) -> Result<Vec<ActionRecord>, StoreError> {
        Ok(self
            .documents
            .get(id)
            .map(|doc| doc.actions.clone())
            .unwrap_or_default())
    }

    async fn correction_records(
        &self,
        id: &TaskId,
        step_index: Option<u32>,
    ) -> Result<Vec<CorrectionRecord>, StoreError> {
        Ok(self
            .documents
            .get(id)
            .map(|doc| doc.corrections_for(step_index))
            .unwrap_or_default())
    }
}
