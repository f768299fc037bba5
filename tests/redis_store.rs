//! Tests against a real Redis server.
//!
//! Run with `BEATCOP_TEST_REDIS=127.0.0.1:6379 cargo test -- --ignored`.

use beatcop::config::{Endpoint, Topology};
use beatcop::lease::redis::connect;
use beatcop::lease::{LeaseStore, LockManager, LockState};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(5);

async fn store() -> Arc<dyn LeaseStore> {
    let addr = std::env::var("BEATCOP_TEST_REDIS").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    let (host, port) = addr.rsplit_once(':').expect("BEATCOP_TEST_REDIS must be host:port");
    let topology = Topology::Single {
        endpoint: Endpoint::Tcp {
            host: host.to_string(),
            port: port.parse().expect("invalid port"),
        },
        database: 0,
        password: None,
    };
    connect(&topology, TTL).await.expect("Could not connect to Redis")
}

fn unique_name() -> String {
    format!("beatcop:test:{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn test_redis_create_is_exclusive() {
    let store = store().await;
    let name = unique_name();

    assert!(store.try_create(&name, "a", TTL).await.unwrap());
    assert!(!store.try_create(&name, "b", TTL).await.unwrap());
    assert_eq!(store.holder(&name).await.unwrap().as_deref(), Some("a"));
    assert!(store.release(&name, "a").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_redis_renew_and_release_check_token() {
    let store = store().await;
    let name = unique_name();
    assert!(store.try_create(&name, "a", TTL).await.unwrap());

    assert!(!store.renew(&name, "b", TTL).await.unwrap());
    assert!(store.renew(&name, "a", TTL).await.unwrap());

    assert!(!store.release(&name, "b").await.unwrap());
    assert_eq!(store.holder(&name).await.unwrap().as_deref(), Some("a"));
    assert!(store.release(&name, "a").await.unwrap());
    assert!(!store.release(&name, "a").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_redis_lease_expires() {
    let store = store().await;
    let name = unique_name();
    assert!(store.try_create(&name, "a", Duration::from_millis(200)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(store.holder(&name).await.unwrap(), None);
    assert!(!store.renew(&name, "a", TTL).await.unwrap());
    assert!(store.try_create(&name, "b", TTL).await.unwrap());
    store.release(&name, "b").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_concurrent_managers() {
    let store = store().await;
    let name = unique_name();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let (store, name) = (store.clone(), name.clone());
        handles.push(tokio::spawn(async move {
            let mut manager = LockManager::new(store);
            let state = manager.acquire(&name, TTL).await.unwrap();
            (state, manager)
        }));
    }

    let mut held = Vec::new();
    for handle in handles {
        let (state, manager) = handle.await.unwrap();
        if state == LockState::Held {
            held.push(manager);
        }
    }
    assert_eq!(held.len(), 1);
    held[0].release().await;
    assert_eq!(store.holder(&name).await.unwrap(), None);
}
