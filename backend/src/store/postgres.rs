//! PostgreSQL datastore (SQLx).

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{AppError, Result};
use crate::models::project::Project;
use crate::models::task::Task;
use crate::models::task_run::{TaskRun, TaskRunDraft, TaskRunFilter};
use crate::models::user::{Contributor, User};
use crate::store::Datastore;

const TASK_RUN_COLUMNS: &str =
    "id, project_id, task_id, user_id, user_ip, created, finish_time, info";

pub struct PgDatastore {
    db: PgPool,
}

impl PgDatastore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect, then apply the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        tracing::info!("Connected to PostgreSQL and applied migrations");
        Ok(Self::new(db))
    }
}

fn map_insert_error(e: sqlx::Error, draft: &TaskRunDraft) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AppError::Conflict(
            format!("Task {} has already been answered by this contributor", draft.task_id),
        ),
        _ => AppError::Database(e.to_string()),
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let user: Option<User> =
            sqlx::query_as(r#"SELECT id, name, api_key, admin FROM "user" WHERE api_key = $1"#)
                .bind(api_key)
                .fetch_optional(&self.db)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(user)
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project: Option<Project> = sqlx::query_as(
            "SELECT id, short_name, name, owner_id, published FROM project WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(project)
    }

    async fn get_project_by_short_name(&self, short_name: &str) -> Result<Option<Project>> {
        let project: Option<Project> = sqlx::query_as(
            "SELECT id, short_name, name, owner_id, published FROM project WHERE short_name = $1",
        )
        .bind(short_name)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(project)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects: Vec<Project> = sqlx::query_as(
            "SELECT id, short_name, name, owner_id, published FROM project ORDER BY id",
        )
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(projects)
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let task: Option<Task> = sqlx::query_as(
            "SELECT id, project_id, created, state, info, n_answers FROM task WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(task)
    }

    async fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let tasks: Vec<Task> = sqlx::query_as(
            r#"
            SELECT id, project_id, created, state, info, n_answers
            FROM task
            WHERE project_id = $1
            ORDER BY id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(tasks)
    }

    async fn count_task_runs_for_task(&self, task_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_run WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count)
    }

    async fn has_contributed(&self, task_id: i64, contributor: &Contributor) -> Result<bool> {
        let query = match contributor {
            Contributor::User(id) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM task_run WHERE task_id = $1 AND user_id = $2)",
            )
            .bind(task_id)
            .bind(*id),
            Contributor::Anonymous(ip) => sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM task_run
                    WHERE task_id = $1 AND user_id IS NULL AND user_ip = $2
                )
                "#,
            )
            .bind(task_id)
            .bind(ip.clone()),
        };
        let exists: bool = query
            .fetch_one(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(exists)
    }

    async fn insert_task_run(&self, draft: TaskRunDraft) -> Result<TaskRun> {
        let run: TaskRun = sqlx::query_as(&format!(
            r#"
            INSERT INTO task_run (project_id, task_id, user_id, user_ip, created, finish_time, info)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TASK_RUN_COLUMNS
        ))
        .bind(draft.project_id)
        .bind(draft.task_id)
        .bind(draft.user_id)
        .bind(&draft.user_ip)
        .bind(&draft.created)
        .bind(&draft.finish_time)
        .bind(&draft.info)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_insert_error(e, &draft))?;
        Ok(run)
    }

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRun>> {
        let run: Option<TaskRun> = sqlx::query_as(&format!(
            "SELECT {} FROM task_run WHERE id = $1",
            TASK_RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(run)
    }

    async fn list_task_runs(&self, filter: &TaskRunFilter) -> Result<Vec<TaskRun>> {
        let runs: Vec<TaskRun> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM task_run
            WHERE ($1::BIGINT IS NULL OR project_id = $1)
              AND ($2::BIGINT IS NULL OR task_id = $2)
              AND ($3::BIGINT IS NULL OR user_id = $3)
            ORDER BY id
            OFFSET $4
            LIMIT $5
            "#,
            TASK_RUN_COLUMNS
        ))
        .bind(filter.project_id)
        .bind(filter.task_id)
        .bind(filter.user_id)
        .bind(filter.offset())
        .bind(filter.limit())
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(runs)
    }

    async fn list_project_task_runs(&self, project_id: i64) -> Result<Vec<TaskRun>> {
        let runs: Vec<TaskRun> = sqlx::query_as(&format!(
            "SELECT {} FROM task_run WHERE project_id = $1 ORDER BY id",
            TASK_RUN_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(runs)
    }

    async fn update_task_run_info(&self, id: i64, info: serde_json::Value) -> Result<TaskRun> {
        let run: Option<TaskRun> = sqlx::query_as(&format!(
            "UPDATE task_run SET info = $2 WHERE id = $1 RETURNING {}",
            TASK_RUN_COLUMNS
        ))
        .bind(id)
        .bind(&info)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        run.ok_or_else(|| AppError::NotFound(format!("Task run {} not found", id)))
    }

    async fn delete_task_run(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM task_run WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
