//! Task-run submission, update and deletion rules.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::api::validation::{forbidden_attributes, parse_object};
use crate::error::{AppError, Result};
use crate::models::task_run::{NewTaskRun, TaskRun, TaskRunDraft, UpdateTaskRun};
use crate::models::user::Contributor;
use crate::services::contributions_guard::ContributionsGuard;
use crate::services::event_bus::{EventBus, TASK_RUN_CREATED, TASK_RUN_DELETED, TASK_RUN_UPDATED};
use crate::store::Datastore;

/// Who is calling, as far as task-run rules are concerned.
#[derive(Debug, Clone)]
pub struct Caller {
    pub contributor: Contributor,
    pub is_admin: bool,
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum Submission {
    Stored(TaskRun),
    /// The target project is unpublished; the answer was discarded.
    Discarded,
}

pub struct TaskRunService {
    store: Arc<dyn Datastore>,
    guard: ContributionsGuard,
    events: Arc<EventBus>,
}

impl TaskRunService {
    pub fn new(store: Arc<dyn Datastore>, guard: ContributionsGuard, events: Arc<EventBus>) -> Self {
        Self {
            store,
            guard,
            events,
        }
    }

    /// Handle a raw submission body.
    ///
    /// Answers for an existing unpublished project are acknowledged without
    /// being stored. Anything else, including bodies that do not parse, goes
    /// through the regular create path and its validation.
    pub async fn submit(&self, body: &[u8], caller: &Caller) -> Result<Submission> {
        if self.targets_unpublished_project(body).await {
            tracing::debug!("Discarding answer for unpublished project");
            return Ok(Submission::Discarded);
        }
        self.create(body, caller).await.map(Submission::Stored)
    }

    async fn targets_unpublished_project(&self, body: &[u8]) -> bool {
        let Some(project_id) = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|data| data.get("project_id").and_then(Value::as_i64))
        else {
            return false;
        };
        match self.store.get_project(project_id).await {
            Ok(Some(project)) => !project.published,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Project lookup failed during submission: {}", e);
                false
            }
        }
    }

    /// Validate, enrich and persist a new task run.
    pub async fn create(&self, body: &[u8], caller: &Caller) -> Result<TaskRun> {
        let data = parse_object(body)?;
        forbidden_attributes(&data)?;
        let payload: NewTaskRun = serde_json::from_value(data)?;

        let mut draft = TaskRunDraft::from_payload(payload, Utc::now().to_rfc3339());
        self.update_object(&mut draft, &caller.contributor).await?;

        let run = self.store.insert_task_run(draft).await?;
        tracing::info!(
            task_run_id = run.id,
            task_id = run.task_id,
            project_id = run.project_id,
            "Task run stored"
        );
        self.events.emit(TASK_RUN_CREATED, run.project_id, run.id);
        Ok(run)
    }

    /// Check the task and project, require a live stamp, then attach the
    /// contributor identity and the stamped request time.
    pub async fn update_object(
        &self,
        draft: &mut TaskRunDraft,
        contributor: &Contributor,
    ) -> Result<()> {
        let task = self
            .store
            .get_task(draft.task_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("Invalid task_id".to_string()))?;
        if task.project_id != draft.project_id {
            return Err(AppError::Forbidden("Invalid project_id".to_string()));
        }

        if !self.guard.check_task_stamped(&task, contributor).await? {
            return Err(AppError::Forbidden(
                "You must request a task first!".to_string(),
            ));
        }

        match contributor {
            Contributor::Anonymous(ip) => draft.user_ip = Some(ip.clone()),
            Contributor::User(id) => draft.user_id = Some(*id),
        }

        draft.created = self.guard.retrieve_timestamp(&task, contributor).await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<TaskRun> {
        self.store
            .get_task_run(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task run {} not found", id)))
    }

    /// Fetch a run the caller may modify. Anonymous callers may not.
    async fn get_owned(&self, id: i64, caller: &Caller) -> Result<TaskRun> {
        if matches!(caller.contributor, Contributor::Anonymous(_)) {
            return Err(AppError::Unauthorized(
                "Authentication required".to_string(),
            ));
        }
        let run = self.get(id).await?;
        if !caller.is_admin && !run.is_owned_by(&caller.contributor) {
            return Err(AppError::Forbidden(
                "Only the contributor may modify this task run".to_string(),
            ));
        }
        Ok(run)
    }

    /// Replace the answer of an existing run.
    pub async fn update(&self, id: i64, body: &[u8], caller: &Caller) -> Result<TaskRun> {
        let data = parse_object(body)?;
        forbidden_attributes(&data)?;
        let payload: UpdateTaskRun = serde_json::from_value(data)?;

        self.get_owned(id, caller).await?;
        let run = self.store.update_task_run_info(id, payload.info).await?;
        self.events.emit(TASK_RUN_UPDATED, run.project_id, run.id);
        Ok(run)
    }

    pub async fn delete(&self, id: i64, caller: &Caller) -> Result<()> {
        let run = self.get_owned(id, caller).await?;
        if !self.store.delete_task_run(id).await? {
            return Err(AppError::NotFound(format!("Task run {} not found", id)));
        }
        tracing::info!(task_run_id = id, "Task run deleted");
        self.events.emit(TASK_RUN_DELETED, run.project_id, run.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::Task;
    use crate::services::stamp_store::MemoryStampStore;
    use crate::store::memory::MemoryDatastore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryDatastore>,
        guard: ContributionsGuard,
        service: TaskRunService,
        events: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryDatastore::new());
        let guard = ContributionsGuard::new(
            Arc::new(MemoryStampStore::new()),
            Duration::from_secs(3600),
        );
        let events = Arc::new(EventBus::new(16));
        let service = TaskRunService::new(store.clone(), guard.clone(), events.clone());
        Fixture {
            store,
            guard,
            service,
            events,
        }
    }

    fn caller(contributor: Contributor) -> Caller {
        Caller {
            contributor,
            is_admin: false,
        }
    }

    fn body(project_id: i64, task_id: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "project_id": project_id,
            "task_id": task_id,
            "info": {"answer": "owl"}
        }))
        .unwrap()
    }

    async fn published_task(f: &Fixture) -> Task {
        let project = f.store.add_project("owls", 1, true).await;
        f.store.add_task(project.id, json!({})).await
    }

    #[tokio::test]
    async fn test_unpublished_project_is_discarded() {
        let f = fixture();
        let project = f.store.add_project("draft", 1, false).await;
        let task = f.store.add_task(project.id, json!({})).await;

        let outcome = f
            .service
            .submit(&body(project.id, task.id), &caller(Contributor::User(2)))
            .await
            .unwrap();
        assert!(matches!(outcome, Submission::Discarded));
        assert!(f.store.list_project_task_runs(project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_body_falls_through_to_validation() {
        let f = fixture();
        let err = f
            .service
            .submit(b"not json", &caller(Contributor::User(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
    }

    #[tokio::test]
    async fn test_reserved_keys_rejected() {
        let f = fixture();
        let task = published_task(&f).await;
        let payload = json!({"project_id": task.project_id, "task_id": task.id, "id": 77});
        let err = f
            .service
            .create(&serde_json::to_vec(&payload).unwrap(), &caller(Contributor::User(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_task_is_forbidden() {
        let f = fixture();
        let task = published_task(&f).await;
        let err = f
            .service
            .create(&body(task.project_id, 9999), &caller(Contributor::User(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == "Invalid task_id"));
    }

    #[tokio::test]
    async fn test_project_mismatch_is_forbidden() {
        let f = fixture();
        let task = published_task(&f).await;
        let other = f.store.add_project("other", 1, true).await;
        let err = f
            .service
            .create(&body(other.id, task.id), &caller(Contributor::User(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == "Invalid project_id"));
    }

    #[tokio::test]
    async fn test_unstamped_submission_is_forbidden() {
        let f = fixture();
        let task = published_task(&f).await;
        let err = f
            .service
            .create(&body(task.project_id, task.id), &caller(Contributor::User(2)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::Forbidden(ref m) if m == "You must request a task first!")
        );
    }

    #[tokio::test]
    async fn test_registered_user_submission() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        let task = published_task(&f).await;
        let alice = Contributor::User(2);
        f.guard.stamp(&task, &alice).await.unwrap();
        let stamped = f.guard.retrieve_timestamp(&task, &alice).await.unwrap();

        let run = f
            .service
            .create(&body(task.project_id, task.id), &caller(alice))
            .await
            .unwrap();
        assert_eq!(run.user_id, Some(2));
        assert_eq!(run.user_ip, None);
        assert_eq!(run.created, stamped);
        assert_eq!(run.info, json!({"answer": "owl"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, TASK_RUN_CREATED);
        assert_eq!(event.project_id, task.project_id);
    }

    #[tokio::test]
    async fn test_anonymous_submission_records_ip() {
        let f = fixture();
        let task = published_task(&f).await;
        let anon = Contributor::Anonymous("198.51.100.7".into());
        f.guard.stamp(&task, &anon).await.unwrap();

        let run = f
            .service
            .create(&body(task.project_id, task.id), &caller(anon))
            .await
            .unwrap();
        assert_eq!(run.user_id, None);
        assert_eq!(run.user_ip.as_deref(), Some("198.51.100.7"));
    }

    #[tokio::test]
    async fn test_client_supplied_identity_is_overwritten() {
        let f = fixture();
        let task = published_task(&f).await;
        let alice = Contributor::User(2);
        f.guard.stamp(&task, &alice).await.unwrap();

        let payload = json!({
            "project_id": task.project_id,
            "task_id": task.id,
            "user_id": 1,
            "user_ip": "6.6.6.6"
        });
        let run = f
            .service
            .create(&serde_json::to_vec(&payload).unwrap(), &caller(alice))
            .await
            .unwrap();
        assert_eq!(run.user_id, Some(2));
        assert_eq!(run.user_ip, None);
    }

    #[tokio::test]
    async fn test_second_answer_conflicts() {
        let f = fixture();
        let task = published_task(&f).await;
        let alice = Contributor::User(2);
        f.guard.stamp(&task, &alice).await.unwrap();

        f.service
            .create(&body(task.project_id, task.id), &caller(alice.clone()))
            .await
            .unwrap();
        let err = f
            .service
            .create(&body(task.project_id, task.id), &caller(alice))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_require_ownership() {
        let f = fixture();
        let task = published_task(&f).await;
        let alice = Contributor::User(2);
        f.guard.stamp(&task, &alice).await.unwrap();
        let run = f
            .service
            .create(&body(task.project_id, task.id), &caller(alice.clone()))
            .await
            .unwrap();

        let update = br#"{"info": {"answer": "hawk"}}"#;
        let err = f
            .service
            .update(run.id, update, &caller(Contributor::User(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let updated = f
            .service
            .update(run.id, update, &caller(alice.clone()))
            .await
            .unwrap();
        assert_eq!(updated.info, json!({"answer": "hawk"}));

        let reserved = br#"{"info": 1, "finish_time": "now"}"#;
        assert!(matches!(
            f.service.update(run.id, reserved, &caller(alice.clone())).await,
            Err(AppError::BadRequest(_))
        ));

        let admin = Caller {
            contributor: Contributor::User(99),
            is_admin: true,
        };
        f.service.delete(run.id, &admin).await.unwrap();
        assert!(matches!(
            f.service.get(run.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_anonymous_callers_cannot_modify_runs() {
        let f = fixture();
        let task = published_task(&f).await;
        let anon = Contributor::Anonymous("203.0.113.9".into());
        f.guard.stamp(&task, &anon).await.unwrap();
        let run = f
            .service
            .create(&body(task.project_id, task.id), &caller(anon.clone()))
            .await
            .unwrap();

        // Same address as the author is still not proof of authorship
        let err = f
            .service
            .update(run.id, br#"{"info": "crow"}"#, &caller(anon.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        let err = f.service.delete(run.id, &caller(anon)).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let stored = f.service.get(run.id).await.unwrap();
        assert_eq!(stored.info, json!({"answer": "owl"}));
    }
}
