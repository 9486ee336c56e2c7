use serde::Serialize;

/// A registered contributor. Anonymous contributors have no row here.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub admin: bool,
}

/// Who is answering a task: a registered user or an anonymous client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Contributor {
    User(i64),
    Anonymous(String),
}

impl std::fmt::Display for Contributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}", id),
            Self::Anonymous(ip) => write!(f, "{}", ip),
        }
    }
}
