//! Ticket registry cleaner over the in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cas_ticket::cleaner::{
    CleanerState, CleanupStatus, LockingStrategy, NoOpLockingStrategy, TicketRegistryCleaner,
};
use cas_ticket::logout::{LogoutManager, LogoutRequest, SingleLogoutMessageSender};
use cas_ticket::model::{
    Authentication, Principal, Service, ServiceTicket, Ticket, TicketGrantingTicket, TicketKind,
    TicketState,
};
use cas_ticket::store::{TicketRecord, TicketStore};
use cas_ticket::tracking::{DefaultTicketTrackingPolicy, TicketTrackingPolicy};
use cas_ticket::{DefaultTicketRegistry, ExpirationPolicy, TicketError, TicketRegistry, TicketResult};
use cas_ticket_memory::{MemoryTicketStore, create_registry};
use time::OffsetDateTime;

#[derive(Debug, Default)]
struct RecordingSender {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SingleLogoutMessageSender for RecordingSender {
    async fn send(&self, request: &LogoutRequest, _message: &str) -> TicketResult<bool> {
        self.sent.lock().unwrap().push(request.ticket_id.clone());
        Ok(true)
    }
}

#[derive(Debug)]
struct HeldLock;

#[async_trait]
impl LockingStrategy for HeldLock {
    async fn acquire(&self) -> TicketResult<bool> {
        Ok(false)
    }

    async fn release(&self) -> TicketResult<()> {
        Ok(())
    }
}

/// Memory store whose removal of one key, or whose paging, fails.
#[derive(Debug, Default)]
struct FaultyStore {
    inner: MemoryTicketStore,
    stuck_key: Option<String>,
    paging_fails: bool,
}

#[async_trait]
impl TicketStore for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn insert(&self, record: TicketRecord) -> TicketResult<()> {
        self.inner.insert(record).await
    }

    async fn load(&self, key: &str) -> TicketResult<Option<TicketRecord>> {
        self.inner.load(key).await
    }

    async fn replace(&self, record: TicketRecord) -> TicketResult<bool> {
        self.inner.replace(record).await
    }

    async fn compare_and_swap(&self, record: TicketRecord, expected_version: u64) -> TicketResult<bool> {
        self.inner.compare_and_swap(record, expected_version).await
    }

    async fn remove(&self, key: &str) -> TicketResult<bool> {
        if self.stuck_key.as_deref() == Some(key) {
            return Err(TicketError::registry("connection reset"));
        }
        self.inner.remove(key).await
    }

    async fn remove_if_version(&self, key: &str, expected_version: u64) -> TicketResult<bool> {
        self.inner.remove_if_version(key, expected_version).await
    }

    async fn remove_all(&self) -> TicketResult<u64> {
        self.inner.remove_all().await
    }

    async fn page(&self, after: Option<&str>, limit: usize) -> TicketResult<Vec<TicketRecord>> {
        if self.paging_fails {
            return Err(TicketError::registry("connection reset"));
        }
        self.inner.page(after, limit).await
    }

    async fn children(&self, parent_key: &str) -> TicketResult<Vec<TicketRecord>> {
        self.inner.children(parent_key).await
    }

    async fn find_by_principal(&self, principal_key: &str) -> TicketResult<Vec<TicketRecord>> {
        self.inner.find_by_principal(principal_key).await
    }

    async fn count(&self, kind: Option<TicketKind>) -> TicketResult<u64> {
        self.inner.count(kind).await
    }
}

fn session(id: &str, policy: ExpirationPolicy, age: Duration) -> Ticket {
    TicketGrantingTicket::new(
        id,
        Authentication::new(Principal::new("casuser")),
        policy,
        OffsetDateTime::now_utc() - age,
    )
    .into()
}

fn service_ticket(id: &str, parent: &Ticket) -> Ticket {
    ServiceTicket {
        state: TicketState::new(
            id,
            ExpirationPolicy::NeverExpires,
            Some(parent.id().to_string()),
            OffsetDateTime::now_utc(),
        ),
        service: Service::new("https://app.example.org"),
        from_new_login: true,
        proxy_granted: false,
    }
    .into()
}

#[tokio::test]
async fn test_cleaner_removes_expired_sessions_and_sends_logout() {
    let registry: Arc<dyn TicketRegistry> = Arc::new(create_registry());
    let tracking = DefaultTicketTrackingPolicy::default();

    let mut expired = session(
        "TGT-1-expired",
        ExpirationPolicy::HardTimeout {
            time_to_kill: Duration::from_secs(1),
        },
        Duration::from_secs(60),
    );
    let st = service_ticket("ST-1-expired", &expired);
    tracking.track_ticket(&mut expired, &st);
    let alive = session("TGT-2-alive", ExpirationPolicy::NeverExpires, Duration::ZERO);
    for ticket in [&expired, &st, &alive] {
        registry.add_ticket(ticket).await.unwrap();
    }

    let sender = Arc::new(RecordingSender::default());
    let cleaner = TicketRegistryCleaner::new(
        registry.clone(),
        LogoutManager::new(sender.clone()),
        Arc::new(NoOpLockingStrategy),
    );
    assert_eq!(cleaner.state(), CleanerState::Idle);

    let report = cleaner.clean().await;

    assert_eq!(report.status, CleanupStatus::Completed);
    assert_eq!(report.scanned, 3);
    assert!(report.expired >= 1);
    assert_eq!(report.removed, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(cleaner.state(), CleanerState::Done);
    assert_eq!(*sender.sent.lock().unwrap(), vec!["ST-1-expired".to_string()]);

    assert!(registry.get_ticket("TGT-2-alive").await.unwrap().is_some());
    assert_eq!(registry.count_tickets(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cleaner_counts_failed_removal_and_continues() {
    let store = Arc::new(FaultyStore {
        stuck_key: Some("TGT-2-stuck".to_string()),
        ..Default::default()
    });
    let registry: Arc<dyn TicketRegistry> = Arc::new(DefaultTicketRegistry::new(store.clone()));
    for id in ["TGT-1-expired", "TGT-2-stuck", "TGT-3-expired"] {
        registry
            .add_ticket(&session(id, ExpirationPolicy::AlwaysExpires, Duration::ZERO))
            .await
            .unwrap();
    }

    let cleaner = TicketRegistryCleaner::new(
        registry.clone(),
        LogoutManager::default(),
        Arc::new(NoOpLockingStrategy),
    );
    let report = cleaner.clean().await;

    assert_eq!(report.status, CleanupStatus::Completed);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.expired, 3);
    assert_eq!(report.removed, 2);
    assert_eq!(report.failures, 1);
    assert!(store.inner.load("TGT-1-expired").await.unwrap().is_none());
    assert!(store.inner.load("TGT-3-expired").await.unwrap().is_none());
    assert!(store.inner.load("TGT-2-stuck").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleaner_counts_unreadable_page() {
    let store = Arc::new(FaultyStore {
        paging_fails: true,
        ..Default::default()
    });
    let registry: Arc<dyn TicketRegistry> = Arc::new(DefaultTicketRegistry::new(store));
    let cleaner = TicketRegistryCleaner::new(
        registry,
        LogoutManager::default(),
        Arc::new(NoOpLockingStrategy),
    );

    let report = cleaner.clean().await;

    assert_eq!(report.status, CleanupStatus::Completed);
    assert_eq!(report.scanned, 0);
    assert_eq!(report.failures, 1);
    assert_eq!(cleaner.state(), CleanerState::Done);
}

#[tokio::test]
async fn test_cleaner_respects_foreign_lock() {
    let registry: Arc<dyn TicketRegistry> = Arc::new(create_registry());
    registry
        .add_ticket(&session(
            "TGT-1-expired",
            ExpirationPolicy::AlwaysExpires,
            Duration::ZERO,
        ))
        .await
        .unwrap();

    let cleaner =
        TicketRegistryCleaner::new(registry.clone(), LogoutManager::default(), Arc::new(HeldLock));
    let report = cleaner.clean().await;

    assert_eq!(report.status, CleanupStatus::LockUnavailable);
    assert_eq!(report.scanned, 0);
    assert_eq!(registry.count_tickets(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduled_cleaner_runs() {
    let registry: Arc<dyn TicketRegistry> = Arc::new(create_registry());
    registry
        .add_ticket(&session(
            "TGT-1-expired",
            ExpirationPolicy::AlwaysExpires,
            Duration::ZERO,
        ))
        .await
        .unwrap();

    let cleaner = Arc::new(TicketRegistryCleaner::new(
        registry.clone(),
        LogoutManager::default(),
        Arc::new(NoOpLockingStrategy),
    ));
    let handle = cleaner
        .clone()
        .start(Duration::from_millis(10), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(registry.count_tickets(None).await.unwrap(), 0);
    assert_eq!(cleaner.state(), CleanerState::Done);
}
