// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-directional synchronization between two stores.
//!
//! The destination is made equal to the source; the source is never written.
//!
//! # Task layout
//!
//! ```text
//!  watcher(source) ──┐
//!                    ├──► trigger (Notify) ──► main loop ──► synchronize()
//!  watcher(dest) ────┘
//! ```
//!
//! Each watcher blocks in its store's `watch()` and signals the trigger when
//! it returns, or after a backoff when it fails. The trigger stores a permit,
//! so a change signalled during a pass starts another pass right after it.
//!
//! # A pass
//!
//! 1. Lock the source, then the destination
//! 2. `set` every source entry the destination lacks or holds with another value
//! 3. `delete` every destination key the source lacks
//! 4. `drain` the destination, then release both locks
//!
//! A successful pass is followed by a debounce pause, a failed one by a longer
//! backoff. Failures never stop the loop.

use crate::error::Result;
use crate::metrics;
use crate::resilience::PassTiming;
use crate::store::Store;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Mutations applied by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub set: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn mutations(&self) -> usize {
        self.set + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }
}

/// Mirrors `source` into `dest`.
pub struct Synchronizer<S: Store + ?Sized, D: Store + ?Sized> {
    source: Arc<S>,
    dest: Arc<D>,
    timing: PassTiming,
    trigger: Arc<Notify>,
}

impl<S: Store + ?Sized, D: Store + ?Sized> Synchronizer<S, D> {
    pub fn new(source: Arc<S>, dest: Arc<D>, timing: PassTiming) -> Self {
        Self {
            source,
            dest,
            timing,
            trigger: Arc::new(Notify::new()),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn dest(&self) -> &Arc<D> {
        &self.dest
    }

    /// Request a pass without waiting for a store to report a change.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Run one pass and wait until the destination acknowledged it.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        let _source_guard = self.source.lock().await;
        let _dest_guard = self.dest.lock().await;

        let source = self.source.snapshot().await?;
        let mut report = SyncReport::default();

        for (key, value) in &source {
            let current = self.dest.get(key).await?;
            if current.as_deref() == Some(value.as_str()) {
                continue;
            }
            debug!(key = %key, from = ?current, to = %value, "Setting");
            self.dest.set(key, value).await?;
            report.set += 1;
        }

        let wanted: HashSet<&str> = source.iter().map(|(key, _)| key.as_str()).collect();
        for (key, _) in self.dest.snapshot().await? {
            if wanted.contains(key.as_str()) {
                continue;
            }
            debug!(key = %key, "Deleting");
            self.dest.delete(&key).await?;
            report.deleted += 1;
        }

        self.dest.drain().await?;
        Ok(report)
    }

    /// Run until `shutdown_rx` turns `true` or its sender is dropped.
    ///
    /// A first pass runs immediately; later passes run when a store reports
    /// a change.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("synchronizer", source = %self.source.name(), dest = %self.dest.name());

        async move {
            let _ = shutdown_rx.borrow_and_update();
            info!(
                debounce_ms = self.timing.debounce.as_millis() as u64,
                pass_error_backoff_ms = self.timing.pass_error_backoff.as_millis() as u64,
                "Starting synchronizer"
            );

            let watchers = [
                spawn_watcher(Arc::clone(&self.source), Arc::clone(&self.trigger), self.timing.watch_error_backoff),
                spawn_watcher(Arc::clone(&self.dest), Arc::clone(&self.trigger), self.timing.watch_error_backoff),
            ];
            self.trigger();

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping synchronizer");
                            break;
                        }
                        continue;
                    }

                    _ = self.trigger.notified() => {}
                }

                let started = Instant::now();
                let pause = match self.synchronize().await {
                    Ok(report) => {
                        let elapsed = started.elapsed();
                        metrics::record_sync_pass(report.set, report.deleted, elapsed);
                        if report.is_noop() {
                            debug!(elapsed_ms = elapsed.as_millis() as u64, "Stores already in agreement");
                        } else {
                            info!(
                                set = report.set,
                                deleted = report.deleted,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "Synchronized"
                            );
                        }
                        self.timing.debounce
                    }
                    Err(e) => {
                        metrics::record_sync_failure();
                        error!(error = %e, backoff_ms = self.timing.pass_error_backoff.as_millis() as u64, "Synchronization pass failed");
                        self.timing.pass_error_backoff
                    }
                };

                if sleep_or_shutdown(pause, &mut shutdown_rx).await {
                    info!("Shutdown signal received, stopping synchronizer");
                    break;
                }
            }

            for watcher in watchers {
                watcher.abort();
            }
        }
        .instrument(span)
        .await
    }
}

/// Returns `true` if shutdown was signalled during the pause.
async fn sleep_or_shutdown(pause: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(pause) => false,
        result = shutdown_rx.changed() => result.is_err() || *shutdown_rx.borrow(),
    }
}

fn spawn_watcher<T: Store + ?Sized>(store: Arc<T>, trigger: Arc<Notify>, backoff: Duration) -> JoinHandle<()> {
    let span = info_span!("watcher", store = %store.name());
    tokio::spawn(
        async move {
            loop {
                match store.watch().await {
                    Ok(_) => debug!("Change reported"),
                    Err(e) => {
                        metrics::record_watch_error(store.name());
                        warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "Watch failed");
                        tokio::time::sleep(backoff).await;
                    }
                }
                trigger.notify_one();
            }
        }
        .instrument(span),
    )
}
