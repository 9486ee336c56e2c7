//! Guards task-run submission behind a prior "task requested" stamp.
//!
//! When a contributor is handed a task, the guard records the time under a
//! per-(contributor, task) key that expires after the stamp TTL. A submitted
//! answer is only accepted while that stamp exists, and the stamped time
//! becomes the run's `created` value.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::models::task::Task;
use crate::models::user::Contributor;
use crate::services::stamp_store::StampStore;

/// Key namespace shared with other deployments reading the same store.
const KEY_PREFIX: &str = "pybossa:task_requested";

#[derive(Clone)]
pub struct ContributionsGuard {
    store: Arc<dyn StampStore>,
    ttl: Duration,
}

impl ContributionsGuard {
    pub fn new(store: Arc<dyn StampStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// `pybossa:task_requested:user:{user}:task:{task_id}`
    pub fn stamp_key(task: &Task, contributor: &Contributor) -> String {
        format!("{}:user:{}:task:{}", KEY_PREFIX, contributor, task.id)
    }

    /// Record that `contributor` was handed `task` just now.
    pub async fn stamp(&self, task: &Task, contributor: &Contributor) -> Result<()> {
        let key = Self::stamp_key(task, contributor);
        let now = Utc::now().to_rfc3339();
        self.store.set_with_ttl(&key, &now, self.ttl).await?;
        tracing::debug!(task_id = task.id, contributor = %contributor, "Task stamped");
        Ok(())
    }

    /// Whether `contributor` requested `task` within the stamp TTL.
    pub async fn check_task_stamped(&self, task: &Task, contributor: &Contributor) -> Result<bool> {
        self.store
            .exists(&Self::stamp_key(task, contributor))
            .await
    }

    /// The time `contributor` requested `task`, if the stamp is still live.
    pub async fn retrieve_timestamp(
        &self,
        task: &Task,
        contributor: &Contributor,
    ) -> Result<Option<String>> {
        self.store.get(&Self::stamp_key(task, contributor)).await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}
