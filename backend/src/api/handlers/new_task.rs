//! Task distribution handler. Handing out a task stamps it for the caller.

use axum::extract::Extension;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{IntoParams, OpenApi};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::task::Task;
use crate::services::task_scheduler::TaskScheduler;

#[derive(OpenApi)]
#[openapi(paths(new_task), components(schemas(Task)))]
pub struct NewTaskApiDoc;

pub fn router() -> Router<SharedState> {
    Router::new().route("/api/project/:project_id/newtask", get(new_task))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NewTaskQuery {
    /// Number of eligible tasks to skip
    pub offset: Option<usize>,
}

/// GET /api/project/:project_id/newtask
#[utoipa::path(
    get,
    path = "/api/project/{project_id}/newtask",
    tag = "tasks",
    operation_id = "new_task",
    params(
        ("project_id" = i64, Path, description = "Project id"),
        NewTaskQuery,
    ),
    responses(
        (status = 200, description = "Next task for the caller, or {} when none is left", body = Task),
        (status = 404, description = "Project not found"),
    ),
)]
pub async fn new_task(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    project_id: std::result::Result<Path<i64>, PathRejection>,
    query: std::result::Result<Query<NewTaskQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Path(project_id) = project_id?;
    let Query(query) = query?;
    let project = state
        .store
        .get_project(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))?;

    let contributor = auth.contributor();
    let scheduler = TaskScheduler::new(state.store.clone());
    let Some(task) = scheduler
        .next_task(project.id, &contributor, query.offset.unwrap_or(0))
        .await?
    else {
        return Ok(Json(json!({})));
    };

    state.guard.stamp(&task, &contributor).await?;
    Ok(Json(serde_json::to_value(task)?))
}
