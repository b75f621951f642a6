//! Integration tests for `RedisStateStore`.
//!
//! These need a running Redis; point `REDIS_URL` at it and run with
//! `--ignored`.

use std::time::Duration;

use bookmarks_core::state_store::SagaStateStore;
use bookmarks_state_store::redis_store::RedisStateStore;
use uuid::Uuid;

async fn store() -> RedisStateStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
    let prefix = format!("test:{}", Uuid::new_v4());
    RedisStateStore::connect(&url, &prefix).await.unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_set_get_delete_round_trip() {
    let store = store().await;

    store
        .set_with_ttl("pending", Duration::from_secs(5), "{\"a\":1}")
        .await
        .unwrap();
    let stored = store.get("pending").await.unwrap();
    store.delete("pending").await.unwrap();

    assert_eq!(stored.as_deref(), Some("{\"a\":1}"));
    assert_eq!(store.get("pending").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_set_if_absent_is_exclusive_until_expiry() {
    let store = store().await;
    let ttl = Duration::from_millis(200);

    let first = store.set_if_absent_with_ttl("lock", "a", ttl).await.unwrap();
    let second = store.set_if_absent_with_ttl("lock", "b", ttl).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after_expiry = store.set_if_absent_with_ttl("lock", "c", ttl).await.unwrap();

    assert!(first);
    assert!(!second);
    assert!(after_expiry);
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_delete_if_equals_checks_owner() {
    let store = store().await;
    store
        .set_if_absent_with_ttl("lock", "owner-a", Duration::from_secs(5))
        .await
        .unwrap();

    let wrong_owner = store.delete_if_equals("lock", "owner-b").await.unwrap();
    let right_owner = store.delete_if_equals("lock", "owner-a").await.unwrap();

    assert!(!wrong_owner);
    assert!(right_owner);
    assert_eq!(store.get("lock").await.unwrap(), None);
}
