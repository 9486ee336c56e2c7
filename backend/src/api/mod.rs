//! HTTP API: shared state, router assembly and the OpenAPI document.

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod validation;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::exporter::Exporter;
use crate::services::contributions_guard::ContributionsGuard;
use crate::services::event_bus::EventBus;
use crate::storage::StorageBackend;
use crate::store::Datastore;

/// Capacity of the in-process event channel.
const EVENT_BUS_CAPACITY: usize = 1024;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Datastore>,
    pub guard: ContributionsGuard,
    pub storage: Arc<dyn StorageBackend>,
    pub exporter: Arc<Exporter>,
    pub event_bus: Arc<EventBus>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the exporter and event bus around the given backends. Call
    /// [`AppState::start_background_tasks`] once a runtime is available.
    pub fn new(
        config: Config,
        store: Arc<dyn Datastore>,
        guard: ContributionsGuard,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let mut exporter = Exporter::new(store.clone(), storage.clone());
        if config.storage_backend == "filesystem" {
            exporter = exporter.with_local_root(&config.upload_folder);
        }

        Self {
            config,
            store,
            guard,
            storage,
            exporter: Arc::new(exporter),
            event_bus: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
        }
    }

    /// Start listeners that react to domain events.
    pub fn start_background_tasks(&self) {
        self.exporter
            .clone()
            .spawn_invalidation_listener(&self.event_bus);
    }
}

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .merge(handlers::task_runs::router())
        .merge(handlers::new_task::router())
        .merge(handlers::export::router())
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(api)
        .merge(handlers::health::router())
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::build_openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
