//! Project export download handlers.

use axum::extract::Extension;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::exporter::{ExportFormat, ExportType, PregenerateResult};
use crate::models::project::Project;

#[derive(OpenApi)]
#[openapi(
    paths(export_project, pregenerate_exports),
    components(schemas(PregenerateResult, ExportType, ExportFormat))
)]
pub struct ExportApiDoc;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/project/:short_name/tasks/export", get(export_project))
        .route(
            "/project/:short_name/tasks/export/pregenerate",
            post(pregenerate_exports),
        )
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// "task" or "task_run"
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// "json" (default) or "csv"
    pub format: Option<String>,
}

async fn load_project(state: &SharedState, short_name: &str) -> Result<Project> {
    state
        .store
        .get_project_by_short_name(short_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project '{}' not found", short_name)))
}

/// GET /project/:short_name/tasks/export
#[utoipa::path(
    get,
    path = "/project/{short_name}/tasks/export",
    tag = "export",
    operation_id = "export_project",
    params(
        ("short_name" = String, Path, description = "Project short name"),
        ExportQuery,
    ),
    responses(
        (status = 200, description = "ZIP archive", content_type = "application/zip"),
        (status = 400, description = "Unknown export type or format"),
        (status = 404, description = "Project not found"),
    ),
)]
pub async fn export_project(
    State(state): State<SharedState>,
    Path(short_name): Path<String>,
    query: std::result::Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let ty = query
        .ty
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing export type".to_string()))
        .and_then(ExportType::parse)?;
    let format = match query.format.as_deref() {
        Some(format) => ExportFormat::parse(format)?,
        None => ExportFormat::default(),
    };

    let project = load_project(&state, &short_name).await?;
    tracing::debug!(project = %project.short_name, ty = %ty, format = %format, "Export requested");
    state.exporter.response_zip(&project, ty, format).await
}

/// POST /project/:short_name/tasks/export/pregenerate
#[utoipa::path(
    post,
    path = "/project/{short_name}/tasks/export/pregenerate",
    tag = "export",
    operation_id = "pregenerate_exports",
    params(("short_name" = String, Path, description = "Project short name")),
    responses(
        (status = 200, description = "Archives generated", body = PregenerateResult),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Caller is neither the owner nor an admin"),
        (status = 404, description = "Project not found"),
    ),
    security(("api_key" = [])),
)]
pub async fn pregenerate_exports(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(short_name): Path<String>,
) -> Result<Json<PregenerateResult>> {
    let user_id = auth.require_user()?;
    let project = load_project(&state, &short_name).await?;
    if !auth.is_admin && project.owner_id != user_id {
        return Err(AppError::Forbidden(
            "Only the project owner may pregenerate exports".to_string(),
        ));
    }

    let result = state.exporter.pregenerate_zip_files(&project).await?;
    tracing::info!(
        project = %project.short_name,
        location = %result.location,
        "Export archives pregenerated"
    );
    Ok(Json(result))
}
