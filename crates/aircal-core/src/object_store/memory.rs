use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, StoreError};

/// In-process store used by tests and dry runs. Counts writes and can be told
/// to fail existence checks or writes.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    writes: AtomicUsize,
    exists_failures: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.into(), bytes.into());
        }
        self
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    /// The next `times` existence checks fail with a retryable error.
    pub fn fail_next_exists(&self, times: usize) {
        self.exists_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Bytes>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let pending = self.exists_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.exists_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable(format!("exists({key}) failed")));
        }
        Ok(self.lock()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("put({key}) failed")));
        }
        self.lock()?.insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, start_after: Option<&str>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .keys()
            .filter(|key| start_after.is_none_or(|after| key.as_str() > after))
            .cloned()
            .collect())
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
