//! Task run (answer) API handlers.

use axum::extract::Extension;
use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::task_run::{NewTaskRun, TaskRun, TaskRunFilter, UpdateTaskRun};
use crate::services::task_run_service::{Submission, TaskRunService};

#[derive(OpenApi)]
#[openapi(
    paths(list_task_runs, create_task_run, get_task_run, update_task_run, delete_task_run),
    components(schemas(TaskRun, NewTaskRun, UpdateTaskRun, DiscardedResponse))
)]
pub struct TaskRunsApiDoc;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/taskrun", get(list_task_runs).post(create_task_run))
        .route(
            "/api/taskrun/:id",
            get(get_task_run)
                .put(update_task_run)
                .delete(delete_task_run),
        )
}

fn service(state: &SharedState) -> TaskRunService {
    TaskRunService::new(
        state.store.clone(),
        state.guard.clone(),
        state.event_bus.clone(),
    )
}

/// Acknowledgement returned for answers to unpublished projects.
#[derive(Debug, Serialize, ToSchema)]
pub struct DiscardedResponse {
    /// Always "OK"
    pub status: String,
}

/// GET /api/taskrun
#[utoipa::path(
    get,
    path = "/api/taskrun",
    tag = "task_runs",
    operation_id = "list_task_runs",
    params(TaskRunFilter),
    responses(
        (status = 200, description = "Matching task runs", body = Vec<TaskRun>),
    ),
)]
pub async fn list_task_runs(
    State(state): State<SharedState>,
    filter: std::result::Result<Query<TaskRunFilter>, QueryRejection>,
) -> Result<Json<Vec<TaskRun>>> {
    let Query(filter) = filter?;
    let runs = state.store.list_task_runs(&filter).await?;
    Ok(Json(runs))
}

/// POST /api/taskrun
#[utoipa::path(
    post,
    path = "/api/taskrun",
    tag = "task_runs",
    operation_id = "create_task_run",
    request_body = NewTaskRun,
    responses(
        (status = 200, description = "Stored task run, or an acknowledgement for unpublished projects", body = TaskRun),
        (status = 400, description = "Malformed payload or reserved keys"),
        (status = 403, description = "Invalid task, project, or task not requested first"),
        (status = 409, description = "Task already answered by this contributor"),
    ),
)]
pub async fn create_task_run(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    body: Bytes,
) -> Result<Response> {
    let response = match service(&state).submit(&body, &auth.caller()).await? {
        Submission::Stored(run) => Json(run).into_response(),
        Submission::Discarded => Json(DiscardedResponse {
            status: "OK".to_string(),
        })
        .into_response(),
    };
    Ok(response)
}

/// GET /api/taskrun/:id
#[utoipa::path(
    get,
    path = "/api/taskrun/{id}",
    tag = "task_runs",
    operation_id = "get_task_run",
    params(("id" = i64, Path, description = "Task run id")),
    responses(
        (status = 200, description = "Task run", body = TaskRun),
        (status = 404, description = "Task run not found"),
    ),
)]
pub async fn get_task_run(
    State(state): State<SharedState>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<TaskRun>> {
    let Path(id) = id?;
    Ok(Json(service(&state).get(id).await?))
}

/// PUT /api/taskrun/:id
#[utoipa::path(
    put,
    path = "/api/taskrun/{id}",
    tag = "task_runs",
    operation_id = "update_task_run",
    params(("id" = i64, Path, description = "Task run id")),
    request_body = UpdateTaskRun,
    responses(
        (status = 200, description = "Updated task run", body = TaskRun),
        (status = 403, description = "Caller does not own the task run"),
        (status = 404, description = "Task run not found"),
    ),
)]
pub async fn update_task_run(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    id: std::result::Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> Result<Json<TaskRun>> {
    let Path(id) = id?;
    let run = service(&state).update(id, &body, &auth.caller()).await?;
    Ok(Json(run))
}

/// DELETE /api/taskrun/:id
#[utoipa::path(
    delete,
    path = "/api/taskrun/{id}",
    tag = "task_runs",
    operation_id = "delete_task_run",
    params(("id" = i64, Path, description = "Task run id")),
    responses(
        (status = 204, description = "Task run deleted"),
        (status = 403, description = "Caller does not own the task run"),
        (status = 404, description = "Task run not found"),
    ),
)]
pub async fn delete_task_run(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<StatusCode> {
    let Path(id) = id?;
    service(&state).delete(id, &auth.caller()).await?;
    Ok(StatusCode::NO_CONTENT)
}
