//! In-memory datastore.
//!
//! Holds every record in a single `RwLock`-guarded map set. Used by the test
//! suites and when the server runs without `DATABASE_URL`. Seeding methods
//! (`add_user`, `add_project`, `add_task`) are inherent because the HTTP API
//! never creates those records.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::project::Project;
use crate::models::task::{Task, DEFAULT_N_ANSWERS};
use crate::models::task_run::{TaskRun, TaskRunDraft, TaskRunFilter};
use crate::models::user::{Contributor, User};
use crate::store::Datastore;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    projects: BTreeMap<i64, Project>,
    tasks: BTreeMap<i64, Task>,
    task_runs: BTreeMap<i64, TaskRun>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, name: &str, api_key: &str, admin: bool) -> User {
        let mut tables = self.tables.write().await;
        let user = User {
            id: tables.allocate_id(),
            name: name.to_string(),
            api_key: api_key.to_string(),
            admin,
        };
        tables.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_project(&self, short_name: &str, owner_id: i64, published: bool) -> Project {
        let mut tables = self.tables.write().await;
        let project = Project {
            id: tables.allocate_id(),
            short_name: short_name.to_string(),
            name: short_name.to_string(),
            owner_id,
            published,
        };
        tables.projects.insert(project.id, project.clone());
        project
    }

    pub async fn add_task(&self, project_id: i64, info: serde_json::Value) -> Task {
        self.add_task_with_answers(project_id, info, DEFAULT_N_ANSWERS)
            .await
    }

    pub async fn add_task_with_answers(
        &self,
        project_id: i64,
        info: serde_json::Value,
        n_answers: i32,
    ) -> Task {
        let mut tables = self.tables.write().await;
        let task = Task {
            id: tables.allocate_id(),
            project_id,
            created: chrono::Utc::now().to_rfc3339(),
            state: "ongoing".to_string(),
            info,
            n_answers,
        };
        tables.tasks.insert(task.id, task.clone());
        task
    }
}

fn contributed(run: &TaskRun, task_id: i64, contributor: &Contributor) -> bool {
    run.task_id == task_id && run.is_owned_by(contributor)
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.api_key == api_key)
            .cloned())
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.tables.read().await.projects.get(&id).cloned())
    }

    async fn get_project_by_short_name(&self, short_name: &str) -> Result<Option<Project>> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .values()
            .find(|p| p.short_name == short_name)
            .cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.tables.read().await.projects.values().cloned().collect())
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn count_task_runs_for_task(&self, task_id: i64) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .task_runs
            .values()
            .filter(|r| r.task_id == task_id)
            .count() as i64)
    }

    async fn has_contributed(&self, task_id: i64, contributor: &Contributor) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .task_runs
            .values()
            .any(|r| contributed(r, task_id, contributor)))
    }

    async fn insert_task_run(&self, draft: TaskRunDraft) -> Result<TaskRun> {
        let contributor = match (draft.user_id, &draft.user_ip) {
            (Some(id), _) => Contributor::User(id),
            (None, Some(ip)) => Contributor::Anonymous(ip.clone()),
            (None, None) => {
                return Err(AppError::Internal(
                    "task run has neither user_id nor user_ip".to_string(),
                ))
            }
        };

        let mut tables = self.tables.write().await;
        if tables
            .task_runs
            .values()
            .any(|r| contributed(r, draft.task_id, &contributor))
        {
            return Err(AppError::Conflict(format!(
                "Task {} has already been answered by this contributor",
                draft.task_id
            )));
        }

        let id = tables.allocate_id();
        let run = draft.into_task_run(id);
        tables.task_runs.insert(id, run.clone());
        Ok(run)
    }

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRun>> {
        Ok(self.tables.read().await.task_runs.get(&id).cloned())
    }

    async fn list_task_runs(&self, filter: &TaskRunFilter) -> Result<Vec<TaskRun>> {
        let tables = self.tables.read().await;
        Ok(tables
            .task_runs
            .values()
            .filter(|r| filter.matches(r))
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }

    async fn list_project_task_runs(&self, project_id: i64) -> Result<Vec<TaskRun>> {
        let tables = self.tables.read().await;
        Ok(tables
            .task_runs
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_task_run_info(&self, id: i64, info: serde_json::Value) -> Result<TaskRun> {
        let mut tables = self.tables.write().await;
        let run = tables
            .task_runs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Task run {} not found", id)))?;
        run.info = info;
        Ok(run.clone())
    }

    async fn delete_task_run(&self, id: i64) -> Result<bool> {
        Ok(self.tables.write().await.task_runs.remove(&id).is_some())
    }
}
