//! Record persistence for users, projects, tasks and task runs.
//!
//! The [`Datastore`] trait is the seam between request handlers and the
//! database. [`postgres::PgDatastore`] is the production implementation;
//! [`memory::MemoryDatastore`] backs tests and database-less development runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::project::Project;
use crate::models::task::Task;
use crate::models::task_run::{TaskRun, TaskRunDraft, TaskRunFilter};
use crate::models::user::{Contributor, User};

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>>;

    async fn get_project(&self, id: i64) -> Result<Option<Project>>;

    async fn get_project_by_short_name(&self, short_name: &str) -> Result<Option<Project>>;

    /// Every project ordered by id.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn get_task(&self, id: i64) -> Result<Option<Task>>;

    /// All tasks of a project ordered by id.
    async fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>>;

    async fn count_task_runs_for_task(&self, task_id: i64) -> Result<i64>;

    /// Whether `contributor` already answered `task_id`.
    async fn has_contributed(&self, task_id: i64, contributor: &Contributor) -> Result<bool>;

    /// Persist a task run. A second answer by the same contributor to the
    /// same task fails with `AppError::Conflict`.
    async fn insert_task_run(&self, draft: TaskRunDraft) -> Result<TaskRun>;

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRun>>;

    /// One page of task runs ordered by id.
    async fn list_task_runs(&self, filter: &TaskRunFilter) -> Result<Vec<TaskRun>>;

    /// Every task run of a project ordered by id, for exports.
    async fn list_project_task_runs(&self, project_id: i64) -> Result<Vec<TaskRun>>;

    async fn update_task_run_info(&self, id: i64, info: serde_json::Value) -> Result<TaskRun>;

    /// Returns true if a row was deleted.
    async fn delete_task_run(&self, id: i64) -> Result<bool>;
}
