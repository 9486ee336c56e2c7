//! Picks the next task a contributor should answer.

use std::sync::Arc;

use crate::error::Result;
use crate::models::task::Task;
use crate::models::user::Contributor;
use crate::store::Datastore;

/// Default scheduler: lowest task id first, skipping tasks the contributor
/// already answered and tasks that collected `n_answers` runs.
pub struct TaskScheduler {
    store: Arc<dyn Datastore>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Return the `offset`-th eligible task of the project, if any.
    pub async fn next_task(
        &self,
        project_id: i64,
        contributor: &Contributor,
        offset: usize,
    ) -> Result<Option<Task>> {
        let mut skipped = 0;
        for task in self.store.list_tasks(project_id).await? {
            if self.store.has_contributed(task.id, contributor).await? {
                continue;
            }
            let answers = self.store.count_task_runs_for_task(task.id).await?;
            if answers >= i64::from(task.n_answers) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            return Ok(Some(task));
        }
        Ok(None)
    }
}
