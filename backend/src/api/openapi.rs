//! OpenAPI specification generated from handler annotations via utoipa.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Top-level OpenAPI document for the crowdtask API.
///
/// Each handler module contributes its own paths and schemas via per-module
/// `#[derive(OpenApi)]` structs that are merged into this root document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Crowdtask API",
        description = "Crowdsourcing task distribution, answer collection and export.",
        license(name = "AGPL-3.0-or-later", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "task_runs", description = "Answer submission and management"),
        (name = "tasks", description = "Task distribution"),
        (name = "export", description = "Project data export archives"),
        (name = "health", description = "Health checks"),
    ),
    components(schemas(ErrorResponse))
)]
pub struct ApiDoc;

/// Standard error response body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. "NOT_FOUND", "FORBIDDEN")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Adds the `api_key` query parameter security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("api_key"))),
            );
        }
    }
}

/// Build the merged OpenAPI document from all handler modules.
pub fn build_openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();

    doc.merge(super::handlers::task_runs::TaskRunsApiDoc::openapi());
    doc.merge(super::handlers::new_task::NewTaskApiDoc::openapi());
    doc.merge(super::handlers::export::ExportApiDoc::openapi());
    doc.merge(super::handlers::health::HealthApiDoc::openapi());

    doc
}
