//! Session storage collaborator.
//!
//! Stores opaque ceremony session records under string keys. The only
//! synchronization point the ceremony protocol relies on is [`SessionBackend::take`]:
//! it must remove and return the value in one atomic step so that exactly
//! one caller observes a given record.

use crate::repository::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Key/value storage for in-flight ceremony sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous record.
    ///
    /// `expires_at` (Unix milliseconds) is advisory metadata for the
    /// backend's own eviction; expiry is enforced by the reader.
    async fn put(&self, key: &str, value: Vec<u8>, expires_at: u64) -> RepositoryResult<()>;

    /// Read the record under `key` without removing it.
    async fn get(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>>;

    /// Atomically remove and return the record under `key`.
    async fn take(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>>;

    /// Drop records whose `expires_at` is before `now`. Returns the count removed.
    async fn evict_expired(&self, now: u64) -> RepositoryResult<usize>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: u64,
}

/// Session backend kept in process memory.
#[derive(Default)]
pub struct MemorySessionBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> RepositoryError {
    RepositoryError::Unavailable(format!("Lock error: {}", e))
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn put(&self, key: &str, value: Vec<u8>, expires_at: u64) -> RepositoryResult<()> {
        self.entries
            .lock()
            .map_err(lock_error)?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .map_err(lock_error)?
            .get(key)
            .map(|entry| entry.value.clone()))
    }

    async fn take(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .map_err(lock_error)?
            .remove(key)
            .map(|entry| entry.value))
    }

    async fn evict_expired(&self, now: u64) -> RepositoryResult<usize> {
        let mut entries = self.entries.lock().map_err(lock_error)?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_take_is_single_shot() {
        let backend = MemorySessionBackend::new();
        backend.put("k", vec![1, 2, 3], 10).await.unwrap();

        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(backend.take("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(backend.take("k").await.unwrap(), None);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_take_has_one_winner() {
        let backend = Arc::new(MemorySessionBackend::new());
        backend.put("race", vec![9], 10).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move { backend.take("race").await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let backend = MemorySessionBackend::new();
        backend.put("old", vec![1], 100).await.unwrap();
        backend.put("new", vec![2], 300).await.unwrap();

        assert_eq!(backend.evict_expired(200).await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
        assert!(backend.take("old").await.unwrap().is_none());
    }
}
