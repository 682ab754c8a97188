use crate::backend::{WindowEntry, WindowStore};
use crate::error::StoreError;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// A fixed window [WindowStore] that uses [Dashmap](dashmap::DashMap) to store keys in memory.
///
/// Only correct for a single process; every server instance keeps its own counts. Expired
/// windows are evicted by a [Sweeper](crate::Sweeper).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, WindowEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current window for `key`, if one is being tracked (it may already have expired).
    pub fn get(&self, key: &str) -> Option<WindowEntry> {
        self.map.get(key).map(|entry| *entry)
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl WindowStore for InMemoryStore {
    async fn increment(&self, key: &str, interval: Duration) -> Result<WindowEntry, StoreError> {
        let now = Instant::now();
        let fresh = WindowEntry {
            count: 0,
            reset: now
                .checked_add(interval)
                .ok_or(StoreError::IntervalOverflow(interval))?,
        };
        // The entry guard holds the shard lock, so the expiry check and the increment are atomic.
        let mut entry = self.map.entry(key.to_owned()).or_insert(fresh);
        if entry.reset <= now {
            *entry = fresh;
        }
        entry.count = entry.count.saturating_add(1);
        Ok(*entry)
    }

    async fn sweep_expired(&self, now: Instant) -> Result<usize, StoreError> {
        let before = self.map.len();
        self.map.retain(|_k, v| v.reset >= now);
        Ok(before.saturating_sub(self.map.len()))
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::thread;

    const MINUTE: Duration = Duration::from_secs(60);

    #[actix_web::test]
    async fn test_increment() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        let start = Instant::now();
        for i in 1..=3 {
            let entry = store.increment("KEY1", MINUTE).await.unwrap();
            assert_eq!(entry.count, i);
            // The window is fixed at creation, later requests don't extend it
            assert_eq!(entry.reset, start + MINUTE);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
    }

    #[actix_web::test]
    async fn test_expired_window_is_replaced() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        for _ in 0..5 {
            store.increment("KEY1", MINUTE).await.unwrap();
        }
        tokio::time::advance(MINUTE).await;
        // Still tracked, so this exercises the expiry logic rather than a missing key
        assert!(store.get("KEY1").is_some());
        let entry = store.increment("KEY1", MINUTE).await.unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset, Instant::now() + MINUTE);
    }

    #[actix_web::test]
    async fn test_independent_keys() {
        let store = InMemoryStore::new();
        store.increment("1.2.3.4:minute", MINUTE).await.unwrap();
        store.increment("1.2.3.4:minute", MINUTE).await.unwrap();
        let entry = store.increment("1.2.3.4:hour", MINUTE * 60).await.unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(store.len(), 2);
    }

    #[actix_web::test]
    async fn test_sweep_expired() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        store.increment("KEY1", MINUTE).await.unwrap();
        store.increment("KEY2", MINUTE * 2).await.unwrap();
        tokio::time::advance(MINUTE + Duration::from_secs(1)).await;
        let removed = store.sweep_expired(Instant::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("KEY1").is_none());
        assert!(store.get("KEY2").is_some());
    }

    #[actix_web::test]
    async fn test_sweep_keeps_refreshed_window() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        store.increment("KEY1", MINUTE).await.unwrap();
        tokio::time::advance(MINUTE * 2).await;
        // The sweep pass started before a request revived the key
        let sweep_started = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        let refreshed = store.increment("KEY1", MINUTE).await.unwrap();
        assert_eq!(refreshed.count, 1);
        assert_eq!(store.sweep_expired(sweep_started).await.unwrap(), 0);
        assert_eq!(store.get("KEY1"), Some(refreshed));
    }

    #[actix_web::test]
    async fn test_remove_key() {
        let store = InMemoryStore::new();
        store.increment("KEY1", MINUTE).await.unwrap();
        store.increment("KEY1", MINUTE).await.unwrap();
        store.remove_key("KEY1").await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.increment("KEY1", MINUTE).await.unwrap().count, 1);
    }

    #[actix_web::test]
    async fn test_interval_overflow() {
        let store = InMemoryStore::new();
        let result = store.increment("KEY1", Duration::MAX).await;
        assert!(matches!(result, Err(StoreError::IntervalOverflow(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = InMemoryStore::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut highest = 0;
                    for _ in 0..250 {
                        let entry = block_on(store.increment("shared", MINUTE)).unwrap();
                        highest = highest.max(entry.count);
                    }
                    highest
                })
            })
            .collect();
        let highest = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .max()
            .unwrap();
        assert_eq!(highest, 2000);
        assert_eq!(store.get("shared").unwrap().count, 2000);
    }
}
