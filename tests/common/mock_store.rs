//! Recording store for synchronizer tests.
//!
//! Wraps a [`MemoryStore`] and records every write so tests can assert
//! exactly which mutations a pass issued. Failures can be injected into
//! writes and into `watch()`.

use mirror_sync::store::{BoxFuture, Entries};
use mirror_sync::{MemoryStore, MirrorError, Store, StoreGuard};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Set { key: String, value: String },
    Delete { key: String },
    Drain,
}

impl StoreCall {
    pub fn set(key: &str, value: &str) -> Self {
        StoreCall::Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn delete(key: &str) -> Self {
        StoreCall::Delete { key: key.to_string() }
    }
}

/// Store that records all calls to `set()`, `delete()` and `drain()`.
pub struct RecordingStore {
    inner: MemoryStore,
    calls: RwLock<Vec<StoreCall>>,
    /// Writes beyond this count fail
    fail_after_writes: AtomicUsize,
    writes: AtomicUsize,
    fail_watch: AtomicBool,
    watch_calls: AtomicUsize,
}

impl RecordingStore {
    pub fn new(name: &str) -> Self {
        Self::with_entries(name, &[])
    }

    pub fn with_entries(name: &str, entries: &[(&str, &str)]) -> Self {
        Self {
            inner: MemoryStore::with_entries(name, entries.iter().copied()),
            calls: RwLock::new(Vec::new()),
            fail_after_writes: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            fail_watch: AtomicBool::new(false),
            watch_calls: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, for external changes and inspection.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Let `n` more writes succeed, then fail every write.
    pub fn fail_after_writes(&self, n: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.fail_after_writes.store(done + n, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_after_writes.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn fail_watch(&self, fail: bool) {
        self.fail_watch.store(fail, Ordering::SeqCst);
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    /// Mutations only, without drains.
    pub async fn writes(&self) -> Vec<StoreCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| !matches!(call, StoreCall::Drain))
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    fn admit_write(&self) -> mirror_sync::Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_after_writes.load(Ordering::SeqCst) {
            return Err(MirrorError::connection_msg(self.inner.name(), "injected write failure"));
        }
        Ok(())
    }
}

impl Store for RecordingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn snapshot(&self) -> BoxFuture<'_, Entries> {
        self.inner.snapshot()
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            self.admit_write()?;
            self.calls.write().await.push(StoreCall::set(&key, &value));
            self.inner.set(&key, &value).await
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.admit_write()?;
            self.calls.write().await.push(StoreCall::delete(&key));
            self.inner.delete(&key).await
        })
    }

    fn watch(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_watch.load(Ordering::SeqCst) {
                return Err(MirrorError::connection_msg(self.inner.name(), "injected watch failure"));
            }
            self.inner.watch().await
        })
    }

    fn drain(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(StoreCall::Drain);
            self.inner.drain().await
        })
    }

    fn lock(&self) -> Pin<Box<dyn Future<Output = StoreGuard> + Send + '_>> {
        self.inner.lock()
    }
}
