use serde::Serialize;
use utoipa::ToSchema;

/// Default number of answers collected before a task counts as completed.
pub const DEFAULT_N_ANSWERS: i32 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    /// ISO 8601 creation time
    pub created: String,
    /// "ongoing" or "completed"
    pub state: String,
    #[schema(value_type = Object)]
    pub info: serde_json::Value,
    pub n_answers: i32,
}
