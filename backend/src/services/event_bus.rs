//! In-process broadcast of task-run changes.

use serde::Serialize;
use tokio::sync::broadcast;

pub const TASK_RUN_CREATED: &str = "task_run.created";
pub const TASK_RUN_UPDATED: &str = "task_run.updated";
pub const TASK_RUN_DELETED: &str = "task_run.deleted";

/// A change to a project's collected data.
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    /// Event type, e.g. "task_run.created"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Project whose data changed
    pub project_id: i64,
    /// Id of the affected record
    pub entity_id: String,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl DomainEvent {
    /// Create a domain event timestamped to now.
    pub fn now(event_type: impl Into<String>, project_id: i64, entity_id: impl ToString) -> Self {
        Self {
            event_type: event_type.into(),
            project_id,
            entity_id: entity_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Broadcast-based event bus.
///
/// A subscriber that falls behind receives `RecvError::Lagged` and should
/// treat every project as changed.
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Without subscribers the event is dropped.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Create a timestamped event and publish it.
    pub fn emit(&self, event_type: &str, project_id: i64, entity_id: impl ToString) {
        self.publish(DomainEvent::now(event_type, project_id, entity_id));
    }
}
