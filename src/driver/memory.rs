//! Memory Driver Module
//!
//! Process-local backend combining HashMap storage with LRU eviction.
//! This is the terminal fallback of the registry and must never fail.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::driver::{Driver, DriverKind, LruTracker};
use crate::error::DriverResult;

#[derive(Debug, Default)]
struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
    lru: LruTracker,
    evictions: u64,
    recently_evicted: Vec<String>,
}

// == Memory Driver ==
/// In-memory backend capped at a fixed number of items.
///
/// Writing a new key into a full store evicts the least recently used one.
/// Overwriting an existing key never evicts.
#[derive(Debug)]
pub struct MemoryDriver {
    store: RwLock<MemoryStore>,
    max_items: usize,
}

impl MemoryDriver {
    // == Constructor ==
    /// Creates a new memory backend holding at most `max_items` entries.
    ///
    /// A capacity of zero is treated as one so a write can always succeed.
    pub fn new(max_items: usize) -> Self {
        Self {
            store: RwLock::new(MemoryStore::default()),
            max_items: max_items.max(1),
        }
    }

    /// Number of entries evicted so far to respect the capacity.
    pub async fn evictions(&self) -> u64 {
        self.store.read().await.evictions
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> DriverResult<()> {
        let mut store = self.store.write().await;

        let is_overwrite = store.entries.contains_key(key);
        if !is_overwrite && store.entries.len() >= self.max_items {
            if let Some(evicted) = store.lru.evict_oldest() {
                store.entries.remove(&evicted);
                store.evictions += 1;
                debug!(key = %evicted, "memory backend evicted least recently used key");
                // Capped at capacity until drained
                if store.recently_evicted.len() < self.max_items {
                    store.recently_evicted.push(evicted);
                }
            }
        }

        store.entries.insert(key.to_string(), value);
        store.lru.touch(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> DriverResult<Option<Vec<u8>>> {
        let mut store = self.store.write().await;
        let value = store.entries.get(key).cloned();
        if value.is_some() {
            store.lru.touch(key);
        }
        Ok(value)
    }

    async fn has(&self, key: &str) -> bool {
        self.store.read().await.entries.contains_key(key)
    }

    async fn remove(&self, key: &str) -> DriverResult<()> {
        let mut store = self.store.write().await;
        store.entries.remove(key);
        store.lru.remove(key);
        Ok(())
    }

    async fn clear(&self) -> DriverResult<()> {
        let mut store = self.store.write().await;
        store.entries.clear();
        store.lru.clear();
        Ok(())
    }

    async fn keys(&self) -> Vec<String> {
        self.store.read().await.entries.keys().cloned().collect()
    }

    async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    async fn take_evicted(&self) -> Vec<String> {
        std::mem::take(&mut self.store.write().await.recently_evicted)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_and_get() {
        let driver = MemoryDriver::new(10);

        driver.set("key1", b"value1".to_vec()).await.unwrap();

        assert_eq!(driver.get("key1").await.unwrap(), Some(b"value1".to_vec()));
        assert!(driver.has("key1").await);
        assert_eq!(driver.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_get_missing_is_none() {
        let driver = MemoryDriver::new(10);
        assert_eq!(driver.get("missing").await.unwrap(), None);
        assert!(!driver.has("missing").await);
    }

    #[tokio::test]
    async fn test_memory_overwrite_does_not_grow() {
        let driver = MemoryDriver::new(10);
        driver.set("key1", b"a".to_vec()).await.unwrap();
        driver.set("key1", b"b".to_vec()).await.unwrap();

        assert_eq!(driver.get("key1").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(driver.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_lru_eviction_respects_reads() {
        let driver = MemoryDriver::new(3);
        driver.set("key1", b"1".to_vec()).await.unwrap();
        driver.set("key2", b"2".to_vec()).await.unwrap();
        driver.set("key3", b"3".to_vec()).await.unwrap();

        // key1 becomes most recently used, key2 is now the oldest
        driver.get("key1").await.unwrap();
        driver.set("key4", b"4".to_vec()).await.unwrap();

        assert_eq!(driver.len().await, 3);
        assert!(driver.has("key1").await);
        assert!(!driver.has("key2").await);
        assert_eq!(driver.evictions().await, 1);
    }

    #[tokio::test]
    async fn test_memory_reports_evicted_keys_once() {
        let driver = MemoryDriver::new(1);
        driver.set("a", b"1".to_vec()).await.unwrap();
        driver.set("b", b"2".to_vec()).await.unwrap();
        driver.set("b", b"3".to_vec()).await.unwrap();

        assert_eq!(driver.take_evicted().await, vec!["a".to_string()]);
        assert!(driver.take_evicted().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_remove_and_clear() {
        let driver = MemoryDriver::new(10);
        driver.set("a", b"1".to_vec()).await.unwrap();
        driver.set("b", b"2".to_vec()).await.unwrap();

        driver.remove("a").await.unwrap();
        driver.remove("never-set").await.unwrap();
        assert_eq!(driver.keys().await, vec!["b".to_string()]);

        driver.clear().await.unwrap();
        assert_eq!(driver.len().await, 0);
    }

    #[test]
    fn test_memory_is_always_available() {
        let driver = MemoryDriver::new(0);
        assert!(driver.is_available());
        assert_eq!(driver.kind(), DriverKind::Memory);
    }
}
