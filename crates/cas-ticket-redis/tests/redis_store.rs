//! Integration tests for the Redis ticket store.
//!
//! These tests verify:
//! - Record storage, versioning and conditional writes
//! - Secondary indexes (kind, children, principal) stay exact on removal
//! - The registry contract on top of Redis, including single use
//! - The cleaner lock across two owners
//!
//! Tests use testcontainers to spin up a real Redis instance. Every test
//! writes under its own key prefix so they can share one container.

use std::sync::Arc;
use std::time::Duration;

use cas_ticket::cleaner::LockingStrategy;
use cas_ticket::factory::{DefaultTicketFactory, TicketFactory, TicketRequest};
use cas_ticket::model::{Authentication, Principal, Service, TicketKind};
use cas_ticket::store::{TicketRecord, TicketStore};
use cas_ticket::{DefaultTicketRegistry, TicketConfig, TicketRegistry};
use cas_ticket_redis::{RedisLockingStrategy, RedisStoreConfig, RedisTicketStore, create_pool};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> deadpool_redis::Pool {
    let config = RedisStoreConfig {
        url: get_redis_url().await,
        pool_size: 4,
        ..Default::default()
    };
    create_pool(&config).await.expect("redis pool")
}

async fn store() -> RedisTicketStore {
    RedisTicketStore::new(pool().await, format!("test-{}:", uuid::Uuid::new_v4()))
}

fn record(key: &str, kind: TicketKind, parent: Option<&str>, principal: Option<&str>) -> TicketRecord {
    TicketRecord {
        key: key.to_string(),
        kind,
        parent_key: parent.map(str::to_string),
        principal_key: principal.map(str::to_string),
        version: 0,
        expires_at: None,
        body: format!("body-of-{key}").into_bytes(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_load_and_versioning() {
    let store = store().await;
    store
        .insert(record("TGT-1", TicketKind::TicketGrantingTicket, None, Some("casuser")))
        .await
        .unwrap();

    let loaded = store.load("TGT-1").await.unwrap().expect("stored");
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.kind, TicketKind::TicketGrantingTicket);
    assert_eq!(loaded.principal_key.as_deref(), Some("casuser"));
    assert_eq!(loaded.body, b"body-of-TGT-1");

    let mut next = loaded.clone();
    next.body = b"updated".to_vec();
    assert!(store.compare_and_swap(next.clone(), 1).await.unwrap());
    assert!(!store.compare_and_swap(next.clone(), 1).await.unwrap());
    assert!(store.replace(next).await.unwrap());

    let loaded = store.load("TGT-1").await.unwrap().expect("stored");
    assert_eq!(loaded.version, 3);
    assert_eq!(loaded.body, b"updated");

    assert!(store.load("TGT-unknown").await.unwrap().is_none());
    assert!(
        !store
            .replace(record("TGT-unknown", TicketKind::TicketGrantingTicket, None, None))
            .await
            .unwrap()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_indexes_follow_removal() {
    let store = store().await;
    store
        .insert(record("TGT-1", TicketKind::TicketGrantingTicket, None, Some("casuser")))
        .await
        .unwrap();
    store
        .insert(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1"), None))
        .await
        .unwrap();
    store
        .insert(record("ST-2", TicketKind::ServiceTicket, Some("TGT-1"), None))
        .await
        .unwrap();

    assert_eq!(store.count(None).await.unwrap(), 3);
    assert_eq!(store.count(Some(TicketKind::ServiceTicket)).await.unwrap(), 2);
    let children: Vec<_> = store
        .children("TGT-1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(children, ["ST-1", "ST-2"]);
    assert_eq!(store.find_by_principal("casuser").await.unwrap().len(), 1);

    assert!(!store.remove_if_version("ST-1", 7).await.unwrap());
    assert!(store.remove_if_version("ST-1", 1).await.unwrap());
    assert!(!store.remove("ST-1").await.unwrap());
    assert_eq!(store.children("TGT-1").await.unwrap().len(), 1);
    assert_eq!(store.count(Some(TicketKind::ServiceTicket)).await.unwrap(), 1);

    assert_eq!(store.remove_all().await.unwrap(), 2);
    assert_eq!(store.count(None).await.unwrap(), 0);
    assert!(store.find_by_principal("casuser").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_removal_under_hash_tagged_prefix() {
    let store = RedisTicketStore::new(pool().await, format!("{{cas-{}}}:", uuid::Uuid::new_v4()));
    store
        .insert(record(
            "PGT-1",
            TicketKind::ProxyGrantingTicket,
            Some("ST-1"),
            Some("casuser"),
        ))
        .await
        .unwrap();
    store
        .insert(record("PT-1", TicketKind::ProxyTicket, Some("PGT-1"), None))
        .await
        .unwrap();

    assert!(store.remove("PGT-1").await.unwrap());
    assert!(store.children("ST-1").await.unwrap().is_empty());
    assert!(store.find_by_principal("casuser").await.unwrap().is_empty());
    assert_eq!(store.count(Some(TicketKind::ProxyGrantingTicket)).await.unwrap(), 0);

    assert!(store.remove_if_version("PT-1", 1).await.unwrap());
    assert!(store.children("PGT-1").await.unwrap().is_empty());
    assert_eq!(store.count(None).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_page_is_ordered_after_cursor() {
    let store = store().await;
    for key in ["TGT-3", "TGT-1", "TGT-2"] {
        store
            .insert(record(key, TicketKind::TicketGrantingTicket, None, None))
            .await
            .unwrap();
    }

    let first: Vec<_> = store.page(None, 2).await.unwrap().into_iter().map(|r| r.key).collect();
    assert_eq!(first, ["TGT-1", "TGT-2"]);
    let rest: Vec<_> = store
        .page(Some("TGT-2"), 2)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(rest, ["TGT-3"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_registry_cascade_and_single_use() {
    let registry = DefaultTicketRegistry::new(Arc::new(store().await));
    let mut config = TicketConfig::default();
    config.id.use_host_name = false;
    let factory = DefaultTicketFactory::from_config(&config).unwrap();

    let mut tgt = factory
        .create(TicketRequest::ticket_granting_ticket(Authentication::new(Principal::new(
            "casuser",
        ))))
        .unwrap();
    let st = factory
        .create(TicketRequest::service_ticket(
            &mut tgt,
            Service::new("https://app.example.org"),
            false,
        ))
        .unwrap();
    registry.add_ticket(&tgt).await.unwrap();
    registry.add_ticket(&st).await.unwrap();

    assert_eq!(registry.sessions_for("casuser").await.unwrap().len(), 1);

    let consumed = registry
        .consume_ticket(st.id(), TicketKind::ServiceTicket)
        .await
        .unwrap();
    assert!(consumed.is_some());
    assert!(
        registry
            .consume_ticket(st.id(), TicketKind::ServiceTicket)
            .await
            .unwrap()
            .is_none()
    );

    assert_eq!(registry.delete_ticket(tgt.id()).await.unwrap(), 1);
    assert_eq!(registry.count_tickets(None).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_lock_excludes_second_owner() {
    let pool = pool().await;
    let key = format!("test-lock-{}", uuid::Uuid::new_v4());
    let first = RedisLockingStrategy::new(pool.clone(), &key, Duration::from_secs(30));
    let second = RedisLockingStrategy::new(pool, &key, Duration::from_secs(30));

    assert!(first.acquire().await.unwrap());
    assert!(first.acquire().await.unwrap());
    assert!(!second.acquire().await.unwrap());

    second.release().await.unwrap();
    assert!(!second.acquire().await.unwrap());

    first.release().await.unwrap();
    assert!(second.acquire().await.unwrap());
    second.release().await.unwrap();
}
