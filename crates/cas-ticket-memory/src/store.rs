use std::collections::BTreeSet;
use std::ops::Bound;

use async_trait::async_trait;
use cas_ticket::TicketResult;
use cas_ticket::model::TicketKind;
use cas_ticket::store::{TicketRecord, TicketStore};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

/// Ticket store backed by a concurrent hash map.
///
/// This store provides:
/// - Per-key atomic compare-and-swap through DashMap entry locking
/// - Ordered paging from a key index kept next to the map
/// - Secondary lookups (parent, principal) by scanning; ticket counts of a
///   single node stay small enough for that
/// - No persistence: tickets are lost on restart
///
/// The index is only written while the entry of the same key is locked, so
/// a key is indexed whenever it is present in the map.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    records: DashMap<String, TicketRecord>,
    keys: RwLock<BTreeSet<String>>,
}

impl MemoryTicketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect_where(&self, predicate: impl Fn(&TicketRecord) -> bool) -> Vec<TicketRecord> {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn remove_where(&self, key: &str, predicate: impl Fn(&TicketRecord) -> bool) -> bool {
        match self.records.entry(key.to_owned()) {
            Entry::Occupied(entry) if predicate(entry.get()) => {
                self.keys.write().remove(key);
                entry.remove();
                true
            }
            _ => false,
        }
    }

    fn keys_after(&self, after: Option<&str>, limit: usize) -> Vec<String> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.keys
            .read()
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: TicketRecord) -> TicketResult<()> {
        let record = TicketRecord { version: 1, ..record };
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                self.keys.write().insert(record.key.clone());
                entry.insert(record);
            }
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> TicketResult<Option<TicketRecord>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn replace(&self, record: TicketRecord) -> TicketResult<bool> {
        let Some(mut entry) = self.records.get_mut(&record.key) else {
            return Ok(false);
        };
        let version = entry.version + 1;
        *entry = TicketRecord { version, ..record };
        Ok(true)
    }

    async fn compare_and_swap(&self, record: TicketRecord, expected_version: u64) -> TicketResult<bool> {
        let Some(mut entry) = self.records.get_mut(&record.key) else {
            return Ok(false);
        };
        if entry.version != expected_version {
            tracing::trace!(
                key = %record.key,
                expected = expected_version,
                actual = entry.version,
                "Version conflict"
            );
            return Ok(false);
        }
        *entry = TicketRecord {
            version: expected_version + 1,
            ..record
        };
        Ok(true)
    }

    async fn remove(&self, key: &str) -> TicketResult<bool> {
        Ok(self.remove_where(key, |_| true))
    }

    async fn remove_if_version(&self, key: &str, expected_version: u64) -> TicketResult<bool> {
        Ok(self.remove_where(key, |record| record.version == expected_version))
    }

    async fn remove_all(&self) -> TicketResult<u64> {
        let keys: Vec<String> = self.keys.read().iter().cloned().collect();
        let removed = keys
            .iter()
            .filter(|key| self.remove_where(key, |_| true))
            .count();
        tracing::debug!(removed, "Cleared in-memory ticket store");
        Ok(removed as u64)
    }

    async fn page(&self, after: Option<&str>, limit: usize) -> TicketResult<Vec<TicketRecord>> {
        let mut records = Vec::with_capacity(limit);
        let mut cursor = after.map(str::to_owned);

        // Keys removed after the index read are skipped; read on to fill the page.
        while records.len() < limit {
            let keys = self.keys_after(cursor.as_deref(), limit - records.len());
            let Some(last) = keys.last().cloned() else {
                break;
            };
            records.extend(
                keys.iter()
                    .filter_map(|key| self.records.get(key).map(|entry| entry.value().clone())),
            );
            cursor = Some(last);
        }
        Ok(records)
    }

    async fn children(&self, parent_key: &str) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.collect_where(|record| record.parent_key.as_deref() == Some(parent_key)))
    }

    async fn find_by_principal(&self, principal_key: &str) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.collect_where(|record| record.principal_key.as_deref() == Some(principal_key)))
    }

    async fn count(&self, kind: Option<TicketKind>) -> TicketResult<u64> {
        let count = match kind {
            None => self.records.len(),
            Some(kind) => self
                .records
                .iter()
                .filter(|entry| entry.value().kind == kind)
                .count(),
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, kind: TicketKind, parent: Option<&str>) -> TicketRecord {
        TicketRecord {
            key: key.to_string(),
            kind,
            parent_key: parent.map(str::to_string),
            principal_key: None,
            version: 0,
            expires_at: None,
            body: key.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_first_version() {
        let store = MemoryTicketStore::new();
        store
            .insert(record("TGT-1", TicketKind::TicketGrantingTicket, None))
            .await
            .unwrap();

        let loaded = store.load("TGT-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert!(store.load("TGT-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_requires_existing_record() {
        let store = MemoryTicketStore::new();
        let replaced = store
            .replace(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1")))
            .await
            .unwrap();
        assert!(!replaced);
        assert!(store.is_empty());

        store
            .insert(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1")))
            .await
            .unwrap();
        assert!(
            store
                .replace(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1")))
                .await
                .unwrap()
        );
        assert_eq!(store.load("ST-1").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_version() {
        let store = MemoryTicketStore::new();
        store
            .insert(record("TGT-1", TicketKind::TicketGrantingTicket, None))
            .await
            .unwrap();

        let stale = store
            .compare_and_swap(record("TGT-1", TicketKind::TicketGrantingTicket, None), 7)
            .await
            .unwrap();
        assert!(!stale);

        let fresh = store
            .compare_and_swap(record("TGT-1", TicketKind::TicketGrantingTicket, None), 1)
            .await
            .unwrap();
        assert!(fresh);
        assert_eq!(store.load("TGT-1").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_remove_if_version() {
        let store = MemoryTicketStore::new();
        store
            .insert(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1")))
            .await
            .unwrap();

        assert!(!store.remove_if_version("ST-1", 2).await.unwrap());
        assert!(store.remove_if_version("ST-1", 1).await.unwrap());
        assert!(!store.remove_if_version("ST-1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_page_is_ordered_and_resumable() {
        let store = MemoryTicketStore::new();
        for key in ["ST-3", "ST-1", "ST-2", "TGT-1"] {
            store
                .insert(record(key, TicketKind::ServiceTicket, None))
                .await
                .unwrap();
        }

        let first = store.page(None, 2).await.unwrap();
        let keys: Vec<_> = first.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["ST-1", "ST-2"]);

        let second = store.page(Some("ST-2"), 2).await.unwrap();
        let keys: Vec<_> = second.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["ST-3", "TGT-1"]);

        assert!(store.page(Some("TGT-1"), 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_and_counts() {
        let store = MemoryTicketStore::new();
        store
            .insert(record("TGT-1", TicketKind::TicketGrantingTicket, None))
            .await
            .unwrap();
        store
            .insert(record("ST-1", TicketKind::ServiceTicket, Some("TGT-1")))
            .await
            .unwrap();
        store
            .insert(record("ST-2", TicketKind::ServiceTicket, Some("TGT-1")))
            .await
            .unwrap();

        assert_eq!(store.children("TGT-1").await.unwrap().len(), 2);
        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some(TicketKind::ServiceTicket)).await.unwrap(), 2);
        assert_eq!(store.remove_all().await.unwrap(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_index_follows_removals() {
        let store = MemoryTicketStore::new();
        for key in ["ST-1", "ST-2", "ST-3"] {
            store
                .insert(record(key, TicketKind::ServiceTicket, None))
                .await
                .unwrap();
        }
        // Reinsertion keeps a single index entry
        store
            .insert(record("ST-2", TicketKind::ServiceTicket, None))
            .await
            .unwrap();
        assert_eq!(store.keys.read().len(), 3);

        assert!(store.remove("ST-1").await.unwrap());
        assert!(!store.remove_if_version("ST-2", 9).await.unwrap());
        assert!(store.remove_if_version("ST-2", 1).await.unwrap());
        assert_eq!(store.keys.read().iter().collect::<Vec<_>>(), ["ST-3"]);

        let page = store.page(None, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "ST-3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_page_resumes_during_concurrent_removals() {
        let store = std::sync::Arc::new(MemoryTicketStore::new());
        for i in 0..1000 {
            store
                .insert(record(&format!("ST-{i:04}"), TicketKind::ServiceTicket, None))
                .await
                .unwrap();
        }

        let remover = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in (0..1000).step_by(2) {
                    store.remove(&format!("ST-{i:04}")).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store.page(cursor.as_deref(), 7).await.unwrap();
            let full = page.len() == 7;
            cursor = page.last().map(|r| r.key.clone());
            seen.extend(page.into_iter().map(|r| r.key));
            if !full {
                break;
            }
        }
        remover.await.unwrap();

        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        for i in (1..1000).step_by(2) {
            let key = format!("ST-{i:04}");
            assert!(seen.binary_search(&key).is_ok(), "{key} was skipped");
        }
        assert_eq!(store.len(), 500);
        assert_eq!(store.keys.read().len(), 500);
    }
}
