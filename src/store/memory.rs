use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{KeyValueStore, LeaseId, StoreError};

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: i64,
}

impl Inner {
    /// Drops expired leases together with every key attached to them.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.leases.remove(&id);
            self.entries.retain(|key, entry| {
                let keep = entry.lease != Some(id);
                if !keep {
                    debug!(key = %key, lease = %id, "Lease expired, key removed");
                }
                keep
            });
        }
    }
}

/// In-process store with the same lease semantics as etcd: a leased key
/// disappears once its lease is not renewed within its TTL.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        guard.expire(Instant::now());
        Ok(guard)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.entries.get(key).map(|e| e.value.clone()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(id) = lease {
            if !inner.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.entries.remove(key).is_some())
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut inner = self.lock()?;
        inner.next_lease += 1;
        let id = LeaseId(inner.next_lease);
        inner.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn leased_key_expires_without_keepalive() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        store.put("/agents/a", "{}", Some(lease)).await.unwrap();
        store.put("/microservices/b", "{}", None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(store.get("/agents/a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get("/agents/a").await.unwrap().is_none());
        assert!(store.get("/microservices/b").await.unwrap().is_some());
        assert!(matches!(
            store.keep_alive(lease).await,
            Err(StoreError::LeaseNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_pushes_expiry_back() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        store.put("/agents/a", "{}", Some(lease)).await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            store.keep_alive(lease).await.unwrap();
        }
        assert!(store.get("/agents/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_with_unknown_lease_fails() {
        let store = MemoryStore::new();

        let err = store.put("/agents/a", "{}", Some(LeaseId(42))).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseNotFound(LeaseId(42))));
    }

    #[tokio::test]
    async fn prefix_scan_stops_at_prefix_boundary() {
        let store = MemoryStore::new();
        store.put("/agents/a", "1", None).await.unwrap();
        store.put("/agentsx", "2", None).await.unwrap();
        store.put("/b", "3", None).await.unwrap();

        let pairs = store.get_prefix("/agents/").await.unwrap();
        assert_eq!(pairs, vec![("/agents/a".to_string(), "1".to_string())]);
        assert!(store.delete("/b").await.unwrap());
        assert!(!store.delete("/b").await.unwrap());
    }
}
