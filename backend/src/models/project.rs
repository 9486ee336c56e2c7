use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Project {
    pub id: i64,
    /// URL-safe identifier, also used to name export archives.
    pub short_name: String,
    pub name: String,
    pub owner_id: i64,
    /// Unpublished projects silently discard submitted answers.
    pub published: bool,
}
