use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::user::Contributor;

/// A single answer submitted for a task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct TaskRun {
    pub id: i64,
    pub project_id: i64,
    pub task_id: i64,
    pub user_id: Option<i64>,
    pub user_ip: Option<String>,
    /// When the contributor requested the task (taken from the stamp store).
    pub created: Option<String>,
    /// When the answer was received.
    pub finish_time: String,
    #[schema(value_type = Object)]
    pub info: serde_json::Value,
}

impl TaskRun {
    /// Whether this run was submitted by `contributor`.
    pub fn is_owned_by(&self, contributor: &Contributor) -> bool {
        match contributor {
            Contributor::User(id) => self.user_id == Some(*id),
            Contributor::Anonymous(ip) => {
                self.user_id.is_none() && self.user_ip.as_deref() == Some(ip.as_str())
            }
        }
    }
}

/// Client payload for creating a task run.
///
/// `user_id` and `user_ip` are accepted but always overwritten from the
/// resolved caller.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NewTaskRun {
    pub project_id: i64,
    pub task_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub user_ip: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub info: serde_json::Value,
}

/// A validated task run ready to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct TaskRunDraft {
    pub project_id: i64,
    pub task_id: i64,
    pub user_id: Option<i64>,
    pub user_ip: Option<String>,
    pub created: Option<String>,
    pub finish_time: String,
    pub info: serde_json::Value,
}

impl TaskRunDraft {
    /// Start a draft from the client payload, dropping any client-supplied identity.
    pub fn from_payload(payload: NewTaskRun, finish_time: String) -> Self {
        Self {
            project_id: payload.project_id,
            task_id: payload.task_id,
            user_id: None,
            user_ip: None,
            created: None,
            finish_time,
            info: payload.info,
        }
    }

    pub fn into_task_run(self, id: i64) -> TaskRun {
        TaskRun {
            id,
            project_id: self.project_id,
            task_id: self.task_id,
            user_id: self.user_id,
            user_ip: self.user_ip,
            created: self.created,
            finish_time: self.finish_time,
            info: self.info,
        }
    }
}

/// Client payload for updating a task run. Only the answer itself may change.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskRun {
    #[schema(value_type = Object)]
    pub info: serde_json::Value,
}

/// Filters for listing task runs.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskRunFilter {
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub user_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskRunFilter {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Page size clamped to `1..=MAX_LIMIT`.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Whether `run` satisfies every filter set on `self` (ignores paging).
    pub fn matches(&self, run: &TaskRun) -> bool {
        self.project_id.map_or(true, |id| run.project_id == id)
            && self.task_id.map_or(true, |id| run.task_id == id)
            && self.user_id.map_or(true, |id| run.user_id == Some(id))
    }
}
