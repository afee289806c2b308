// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The store capability shared by every mirrored key-value store.
//!
//! The [`Synchronizer`](crate::synchronizer::Synchronizer) only ever talks to
//! stores through [`Store`], so the address-list mirror, the symlink directory
//! and the in-memory store used by tests are interchangeable.
//!
//! # Mutations and drain
//!
//! `set` and `delete` may complete asynchronously: an implementation backed by
//! a remote device enqueues a command and returns at once, and the effect
//! becomes visible in `snapshot`/`get` only once the device acknowledges it.
//! [`Store::drain`] blocks until every mutation issued so far is acknowledged.
//!
//! # Exclusive access
//!
//! Every store owns a [`StoreLock`]. A caller running a multi-step operation
//! (a diff-apply pass, a reconciliation sweep) holds the [`StoreGuard`]
//! returned by [`Store::lock`] for its duration; other writers that follow the
//! same protocol wait.
//!
//! # Example
//!
//! ```rust
//! use mirror_sync::store::{MemoryStore, Store};
//!
//! # async fn example() -> mirror_sync::Result<()> {
//! let store = MemoryStore::new("scratch");
//! let _guard = store.lock().await;
//! store.set("1.2.3.4", "a_test").await?;
//! assert_eq!(store.get("1.2.3.4").await?, Some("a_test".to_string()));
//! # Ok(())
//! # }
//! ```

use crate::error::{MirrorError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Notify, OwnedMutexGuard};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A point-in-time listing of `(key, value)` pairs, ordered by key.
pub type Entries = Vec<(String, String)>;

/// Operations every mirrored store provides.
///
/// Object safe: the synchronizer holds stores as `Arc<dyn Store>`.
pub trait Store: Send + Sync + 'static {
    /// Name used in log fields and metric labels.
    fn name(&self) -> &str;

    /// All entries, consistent at a single instant.
    fn snapshot(&self) -> BoxFuture<'_, Entries>;

    /// Value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> BoxFuture<'_, Option<String>>;

    /// Insert or replace `key`.
    ///
    /// Asynchronous backends only schedule the mutation; see [`drain`](Self::drain).
    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, ()>;

    /// Remove `key`. Same completion semantics as [`set`](Self::set).
    fn delete(&self, key: &str) -> BoxFuture<'_, ()>;

    /// Block until the store changed since the previous call.
    ///
    /// Level-triggered: a change that happened while nobody was waiting makes
    /// the next call return immediately.
    fn watch(&self) -> BoxFuture<'_, bool>;

    /// Block until every mutation issued by this process is acknowledged.
    ///
    /// Default implementation returns at once (synchronous stores).
    fn drain(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Acquire exclusive access; released when the guard is dropped.
    fn lock(&self) -> Pin<Box<dyn Future<Output = StoreGuard> + Send + '_>>;
}

// =============================================================================
// StoreLock
// =============================================================================

/// The mutual-exclusion primitive owned by each store instance.
///
/// Cloning shares the same lock.
#[derive(Debug, Clone, Default)]
pub struct StoreLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

/// Exclusive access to a store, held until dropped.
#[derive(Debug)]
pub struct StoreGuard {
    _guard: OwnedMutexGuard<()>,
}

impl StoreLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> StoreGuard {
        StoreGuard {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Take exclusive access if nobody holds it.
    pub fn try_acquire(&self) -> Option<StoreGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| StoreGuard { _guard: guard })
    }

    /// Whether someone currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// An in-process store with synchronous mutations.
///
/// Useful as a scratch destination and in tests. Changes made through
/// [`Store::set`]/[`Store::delete`] are treated as local and do not wake
/// [`Store::watch`]; [`apply_external`](Self::apply_external) simulates a
/// change made by someone else and does.
pub struct MemoryStore {
    name: String,
    entries: Mutex<BTreeMap<String, String>>,
    changed: Notify,
    lock: StoreLock,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
            changed: Notify::new(),
            lock: StoreLock::new(),
        }
    }

    /// Create a store pre-populated with `entries`.
    pub fn with_entries<K, V>(name: impl Into<String>, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new(name);
        store
            .entries
            .lock()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Replace (`Some`) or remove (`None`) an entry as an outside writer would.
    pub fn apply_external(&self, key: &str, value: Option<&str>) {
        {
            let mut entries = self.entries.lock();
            match value {
                Some(value) => {
                    entries.insert(key.to_string(), value.to_string());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        self.changed.notify_one();
    }

    /// Owned copy of the current contents.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> BoxFuture<'_, Entries> {
        Box::pin(async move {
            Ok(self
                .entries
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.lock().get(&key).cloned()) })
    }

    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            tracing::trace!(store = %self.name, key = %key, value = %value, "Memory set");
            self.entries.lock().insert(key, value);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            tracing::trace!(store = %self.name, key = %key, "Memory delete");
            match self.entries.lock().remove(&key) {
                Some(_) => Ok(()),
                None => Err(MirrorError::KeyNotFound(key)),
            }
        })
    }

    fn watch(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.changed.notified().await;
            Ok(true)
        })
    }

    fn lock(&self) -> Pin<Box<dyn Future<Output = StoreGuard> + Send + '_>> {
        Box::pin(self.lock.acquire())
    }
}
