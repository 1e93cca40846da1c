use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use waypoint_core_types::{ActionRecord, CorrectionRecord, Task, TaskId};

use crate::{validate_task_id, StoreError, TaskDocument, TaskStore};

/// Filesystem-backed store writing one JSON document per task under
/// `<root>/tasks/<task_id>.json`.
///
/// Writes go to a sibling temp file and are renamed into place. A single
/// async mutex serializes read-modify-write cycles within the process.
pub struct JsonFileTaskStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTaskStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            root: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    fn task_path(&self, id: &TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", id))
    }

    async fn load(&self, id: &TaskId) -> Result<TaskDocument, StoreError> {
        validate_task_id(id)?;
        let path = self.task_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(TaskDocument::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, id: &TaskId, doc: &TaskDocument) -> Result<(), StoreError> {
        let dir = self.tasks_dir();
        fs::create_dir_all(&dir).await?;
        let path = self.task_path(id);
        let tmp = dir.join(format!("{}.json.tmp", id));
        let payload = serde_json::to_vec_pretty(doc)?;
        fs::write(&tmp, payload).await?;
        fs::rename(&tmp, &path).await?;
        debug!(target: "task_store", task_id = %id, path = %path.display(), "task document written");
        Ok(())
    }

    async fn modify<T: Send>(
        &self,
        id: &TaskId,
        apply: impl FnOnce(&mut TaskDocument) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(id).await?;
        let out = apply(&mut doc)?;
        self.save(id, &doc).await?;
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.load(id).await?.task)
    }

    async fn put(&self, task: Task) -> Result<Task, StoreError> {
        let id = task.id.clone();
        self.modify(&id, move |doc| doc.apply_put(task)).await
    }

    async fn append_action_record(&self, record: ActionRecord) -> Result<(), StoreError> {
        let id = record.task_id.clone();
        self.modify(&id, move |doc| doc.apply_action(record)).await
    }

    async fn append_correction_record(&self, record: CorrectionRecord) -> Result<(), StoreError> {
        let id = record.task_id.clone();
        self.modify(&id, move |doc| doc.apply_correction(record)).await
    }

    async fn commit(
        &self,
        task: Task,
        action: Option<ActionRecord>,
        correction: Option<CorrectionRecord>,
    ) -> Result<Task, StoreError> {
        let id = task.id.clone();
        self.modify(&id, move |doc| doc.apply_commit(task, action, correction))
            .await
    }

    async fn action_records(&self, id: &TaskId) -> Result<Vec<ActionRecord>, StoreError> {
        Ok(self.load(id).await?.actions)
    }

    async fn correction_records(
        &self,
        id: &TaskId,
        step_index: Option<u32>,
    ) -> Result<Vec<CorrectionRecord>, StoreError> {
        Ok(self.load(id).await?.corrections_for(step_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let tmp = tempdir().expect("temp dir");
        let store = JsonFileTaskStore::new(tmp.path());
        let err = store.get(&TaskId::from("../x")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTaskId(_)));
    }

    #[tokio::test]
    async fn missing_document_reads_as_empty() {
        let tmp = tempdir().expect("temp dir");
        let store = JsonFileTaskStore::new(tmp.path());
        let id = TaskId::new();
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.action_records(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_writes_document_file() {
        let tmp = tempdir().expect("temp dir");
        let store = JsonFileTaskStore::new(tmp.path());
        let task = Task::new("find a flight", None);
        let stored = store.put(task).await.unwrap();
        let path = tmp.path().join("tasks").join(format!("{}.json", stored.id));
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
