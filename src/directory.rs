// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A directory of symbolic links as a [`Store`].
//!
//! Each link is one entry: the file name is the key and the link target the
//! value. Regular files, directories and links whose target does not match
//! the pattern are ignored.
//!
//! ```text
//! /srv/blocked/
//! ├── 6.2.3.4 -> listname_test     entry
//! ├── 0.9.8.7 -> unknown_link      ignored (pattern)
//! ├── 0.1.1.1/                     ignored (directory)
//! └── regular_file                 ignored
//! ```
//!
//! Changes are detected by polling the directory's mtime.

use crate::error::{MirrorError, Result};
use crate::store::{BoxFuture, Entries, Store, StoreGuard, StoreLock};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

pub struct DirectoryStore {
    name: String,
    path: PathBuf,
    pattern: Regex,
    poll_interval: Duration,
    entries: Mutex<BTreeMap<String, String>>,
    mtime: Mutex<Option<SystemTime>>,
    lock: StoreLock,
}

impl DirectoryStore {
    /// Open `path` and load its entries.
    pub async fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        pattern: Regex,
        poll_interval: Duration,
    ) -> Result<Self> {
        let store = Self {
            name: name.into(),
            path: path.into(),
            pattern,
            poll_interval,
            entries: Mutex::new(BTreeMap::new()),
            mtime: Mutex::new(None),
            lock: StoreLock::new(),
        };
        let mtime = store.read_mtime().await?;
        *store.mtime.lock() = Some(mtime);
        store.fetch().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload all entries from disk.
    pub async fn fetch(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| MirrorError::io(format!("read_dir {}", self.path.display()), e))?;

        let mut entries = BTreeMap::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MirrorError::io(format!("read_dir {}", self.path.display()), e))?
        {
            // Vanished or not a link.
            let Ok(target) = tokio::fs::read_link(entry.path()).await else {
                continue;
            };
            let value = target.to_string_lossy().into_owned();
            if self.pattern.is_match(&value) {
                entries.insert(entry.file_name().to_string_lossy().into_owned(), value);
            }
        }

        trace!(store = %self.name, count = entries.len(), "Directory fetched");
        *self.entries.lock() = entries;
        Ok(())
    }

    async fn read_mtime(&self) -> Result<SystemTime> {
        let op = || format!("stat {}", self.path.display());
        tokio::fs::metadata(&self.path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| MirrorError::io(op(), e))
    }

    /// Whether the directory's mtime moved since the last check.
    async fn changed(&self) -> Result<bool> {
        let current = self.read_mtime().await?;
        let mut last = self.mtime.lock();
        if *last == Some(current) {
            return Ok(false);
        }
        *last = Some(current);
        Ok(true)
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key == "." || key == ".." || key.contains('/') {
            return Err(MirrorError::NotAnEntry {
                path: self.path.join(key).display().to_string(),
            });
        }
        Ok(self.path.join(key))
    }

    async fn remove_entry(&self, key: &str) -> Result<()> {
        let file = self.entry_path(key)?;
        match tokio::fs::symlink_metadata(&file).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                tokio::fs::remove_file(&file)
                    .await
                    .map_err(|e| MirrorError::io(format!("unlink {}", file.display()), e))?;
                self.entries.lock().remove(key);
                Ok(())
            }
            Ok(_) => Err(MirrorError::NotAnEntry {
                path: file.display().to_string(),
            }),
            // The link is already gone; only the cached key is left.
            Err(e) if e.kind() == ErrorKind::NotFound => match self.entries.lock().remove(key) {
                Some(_) => Ok(()),
                None => Err(MirrorError::KeyNotFound(key.to_string())),
            },
            Err(e) => Err(MirrorError::io(format!("lstat {}", file.display()), e)),
        }
    }

    #[cfg(test)]
    fn insert_cached(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }
}

impl Store for DirectoryStore {
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

    /// Create the link, replacing an existing link for the same key.
    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let file = self.entry_path(&key)?;
            loop {
                match tokio::fs::symlink(&value, &file).await {
                    Ok(()) => {
                        debug!(store = %self.name, key = %key, value = %value, "Link created");
                        self.entries.lock().insert(key, value);
                        return Ok(());
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        match self.remove_entry(&key).await {
                            Ok(()) | Err(MirrorError::KeyNotFound(_)) => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => {
                        return Err(MirrorError::io(format!("symlink {}", file.display()), e));
                    }
                }
            }
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.remove_entry(&key).await?;
            debug!(store = %self.name, key = %key, "Link removed");
            Ok(())
        })
    }

    /// Poll the mtime; reload and return once it moves.
    ///
    /// The reload waits for the store lock so that it never overwrites the
    /// cache while a pass is writing through it.
    fn watch(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                if self.changed().await? {
                    let _guard = self.lock.acquire().await;
                    self.fetch().await?;
                    return Ok(true);
                }
            }
        })
    }

    fn lock(&self) -> Pin<Box<dyn Future<Output = StoreGuard> + Send + '_>> {
        Box::pin(self.lock.acquire())
    }
}
