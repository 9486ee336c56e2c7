//! Shared harness: the full router over in-memory backends.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use tempfile::TempDir;

use crowdtask_backend::api::{self, AppState, SharedState};
use crowdtask_backend::config::Config;
use crowdtask_backend::models::project::Project;
use crowdtask_backend::models::task::Task;
use crowdtask_backend::models::user::User;
use crowdtask_backend::services::contributions_guard::ContributionsGuard;
use crowdtask_backend::services::stamp_store::MemoryStampStore;
use crowdtask_backend::storage::filesystem::FilesystemStorage;
use crowdtask_backend::store::memory::MemoryDatastore;

pub struct Harness {
    pub server: TestServer,
    pub store: Arc<MemoryDatastore>,
    pub state: SharedState,
    pub upload_dir: TempDir,
}

pub async fn harness() -> Harness {
    let upload_dir = tempfile::tempdir().unwrap();
    let config = Config {
        upload_folder: upload_dir.path().to_string_lossy().into_owned(),
        // Clients are told apart by `X-Forwarded-For`, see `from_ip`
        trust_proxy_headers: true,
        ..Config::default()
    };

    let store = Arc::new(MemoryDatastore::new());
    let guard = ContributionsGuard::new(
        Arc::new(MemoryStampStore::new()),
        Duration::from_secs(3600),
    );
    let storage = Arc::new(FilesystemStorage::new(upload_dir.path()));

    let state = Arc::new(AppState::new(config, store.clone(), guard, storage));
    state.start_background_tasks();
    let server = TestServer::new(api::router(state.clone())).unwrap();

    Harness {
        server,
        store,
        state,
        upload_dir,
    }
}

/// A published project owned by `owner` with `n` tasks.
pub async fn project_with_tasks(store: &MemoryDatastore, owner: &User, n: usize) -> (Project, Vec<Task>) {
    let project = store.add_project("birds", owner.id, true).await;
    let mut tasks = Vec::with_capacity(n);
    for i in 0..n {
        tasks.push(
            store
                .add_task(project.id, serde_json::json!({"image": format!("bird_{}.jpg", i)}))
                .await,
        );
    }
    (project, tasks)
}

/// Identify the request as an anonymous client at `ip`.
pub fn from_ip(request: TestRequest, ip: &'static str) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_static(ip),
    )
}

/// Authenticate the request with `user`'s API key.
pub fn as_user(request: TestRequest, user: &User) -> TestRequest {
    request.add_query_param("api_key", &user.api_key)
}
