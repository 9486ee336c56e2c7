//! Live integration test for the Redis stamp store.
//!
//! Requires env vars:
//!   REDIS_URL (e.g. redis://127.0.0.1:6379)
//!
//! Run with:
//!   cargo test --test redis_live_test -- --ignored --nocapture

use std::sync::Arc;
use std::time::Duration;

use crowdtask_backend::models::task::Task;
use crowdtask_backend::models::user::Contributor;
use crowdtask_backend::services::contributions_guard::ContributionsGuard;
use crowdtask_backend::services::stamp_store::{RedisStampStore, StampStore};

#[tokio::test]
#[ignore]
async fn test_redis_stamp_roundtrip_and_expiry() {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL not set");
    println!("Testing Redis stamp store against {}", url);

    let store = Arc::new(
        RedisStampStore::connect(&url)
            .await
            .expect("Failed to connect to Redis"),
    );
    assert_eq!(store.backend_name(), "redis");

    let guard = ContributionsGuard::new(store, Duration::from_secs(1));
    let task = Task {
        id: i64::from(std::process::id()),
        project_id: 1,
        created: chrono::Utc::now().to_rfc3339(),
        state: "ongoing".to_string(),
        info: serde_json::json!({}),
        n_answers: 30,
    };
    let contributor = Contributor::Anonymous("live-test".to_string());

    guard.stamp(&task, &contributor).await.expect("stamp failed");
    assert!(guard
        .check_task_stamped(&task, &contributor)
        .await
        .expect("EXISTS failed"));
    let stamped = guard
        .retrieve_timestamp(&task, &contributor)
        .await
        .expect("GET failed");
    assert!(stamped.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!guard
        .check_task_stamped(&task, &contributor)
        .await
        .expect("EXISTS failed"));
}
