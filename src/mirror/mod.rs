// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A RouterOS address-list mirrored into a local [`Store`].
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────────────┐
//!  Synchronizer ──┤ AddressListMirror (Store)             │
//!   set/delete    │   prepare command under state lock    │──► DeviceConnection::send
//!   drain         │   wait for pending == 0               │
//!   watch         │   wait for change notification        │
//!                 └───────────────────────────────────────┘
//!                                   ▲
//!                                   │ MirrorState::dispatch, in arrival order
//!                 ┌─────────────────┴─────────────────────┐
//!                 │ reader task (one per mirror)          │◄── SentenceReader
//!                 │ connect → lock → LISTEN → FETCH → read │
//!                 └───────────────────────────────────────┘
//! ```
//!
//! The reader task is the only consumer of the device's replies, so the
//! snapshot and the change stream are merged in the order the device sent
//! them. During a reconciliation sweep it holds the mirror's [`StoreLock`];
//! a synchronization pass therefore never observes a half-merged mirror.
//!
//! # Writes
//!
//! `set`/`delete` register a pending command, write the request and return.
//! The local maps change only when the acknowledgment is read; [`Store::drain`]
//! waits until no command is pending.

mod commands;
mod session;
pub mod state;

pub use state::{Effects, MirrorState, Mode, PendingCommand, Record};

use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::routeros::connection::DeviceConnection;
use crate::routeros::sentence::{Reply, Sentence};
use crate::store::{BoxFuture, Entries, Store, StoreGuard, StoreLock};
use parking_lot::Mutex;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-mirror options.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Store name, for logs and metrics.
    pub name: String,
    /// Lists not matching this pattern are invisible to the mirror.
    pub pattern: Regex,
    /// Device-side expiry passed on add and set.
    pub timeout: Option<String>,
}

/// State shared between the store front and the reader task.
pub(crate) struct Shared {
    name: String,
    connection: DeviceConnection,
    state: Mutex<MirrorState>,
    lock: StoreLock,
    /// Store lock held for a sweep that has not completed yet.
    sweep: Mutex<Option<(StoreGuard, Instant)>>,
    changed: Notify,
    pending_tx: watch::Sender<usize>,
    timeout: Option<String>,
}

impl Shared {
    fn target(&self) -> &str {
        self.connection.target()
    }

    /// Mutate the state and publish the resulting pending count.
    ///
    /// The count is published under the state lock so that `drain()` never
    /// sees a stale value.
    fn with_state<T>(&self, f: impl FnOnce(&mut MirrorState) -> T) -> T {
        let mut state = self.state.lock();
        let out = f(&mut state);
        let pending = state.pending_len();
        self.pending_tx.send_replace(pending);
        metrics::set_pending_commands(self.target(), pending);
        out
    }

    /// Whether an earlier session left its sweep unfinished.
    fn sweep_pending(&self) -> bool {
        self.sweep.lock().is_some()
    }

    /// Clear the mirror and hold the store lock until the snapshot is merged.
    ///
    /// `guard` is `None` when an unfinished sweep already holds the lock.
    fn begin_sweep(&self, guard: Option<StoreGuard>) {
        let discarded = self.with_state(MirrorState::enter_reconciling);
        if discarded > 0 {
            debug!(discarded, "Discarded commands from previous session");
        }
        if let Some(guard) = guard {
            *self.sweep.lock() = Some((guard, Instant::now()));
        }
    }

    fn finish_sweep(&self) {
        if let Some((_guard, started)) = self.sweep.lock().take() {
            let elapsed = started.elapsed();
            metrics::record_reconcile(self.target(), elapsed);
            info!(elapsed_ms = elapsed.as_millis() as u64, "Reconciliation complete");
        }
    }

    /// Apply one reply and perform the signalling it calls for.
    fn handle(&self, reply: &Reply) -> Result<()> {
        let (effects, entries) = self.with_state(|state| (state.dispatch(reply), state.len()));
        metrics::set_mirrored_entries(self.target(), entries);

        if effects.reconcile_complete {
            self.finish_sweep();
        }
        if effects.changed {
            self.changed.notify_one();
        }
        match effects.fault {
            Some(fault) if fault.is_retryable() => Err(fault),
            Some(fault) => {
                self.report(&fault);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Log a reply-level error the session survives.
    fn report(&self, fault: &MirrorError) {
        match fault {
            MirrorError::Trap { .. } => {
                metrics::record_command_trap(self.target());
                warn!(error = %fault, "Command rejected");
            }
            MirrorError::UnknownTag(_) => {
                metrics::record_unknown_tag(self.target());
                debug!(error = %fault, "Reply ignored");
            }
            MirrorError::ProtocolFatal { .. } => error!(error = %fault, "Device is closing the session"),
            _ => warn!(error = %fault, "Reply ignored"),
        }
    }

    /// Tear down after a lost session so that nobody waits on it.
    ///
    /// An unfinished sweep keeps the store lock; only a completed snapshot
    /// releases it.
    async fn end_session(&self) {
        self.connection.disconnect().await;
        let discarded = self.with_state(MirrorState::end_session);
        if discarded > 0 {
            debug!(discarded, "Dropped unacknowledged commands");
        }
    }
}

/// [`Store`] over a device's `/ip/firewall/address-list`.
///
/// Key is the address, value the list name. Dropping the mirror stops its
/// reader task.
pub struct AddressListMirror {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl AddressListMirror {
    /// Spawn the reader task. Must be called within a Tokio runtime.
    ///
    /// The store lock is held from here until the first sweep completes,
    /// however many sessions that takes.
    pub fn start(connection: DeviceConnection, settings: MirrorSettings) -> Self {
        let (pending_tx, _) = watch::channel(0);
        let lock = StoreLock::new();
        let sweep = lock.try_acquire().map(|guard| (guard, Instant::now()));
        let mut state = MirrorState::new(settings.pattern);
        let _ = state.enter_reconciling();
        let shared = Arc::new(Shared {
            name: settings.name,
            connection,
            state: Mutex::new(state),
            lock,
            sweep: Mutex::new(sweep),
            changed: Notify::new(),
            pending_tx,
            timeout: settings.timeout,
        });
        let reader = tokio::spawn(session::run(Arc::clone(&shared)));
        Self { shared, reader }
    }

    /// Whether a snapshot is currently being merged.
    pub fn is_reconciling(&self) -> bool {
        self.shared.state.lock().is_reconciling()
    }

    /// Mirrored records, ordered by key.
    pub fn records(&self) -> Vec<Record> {
        self.shared.state.lock().records()
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.state.lock().pending_len()
    }

    /// Write a registered command; forget it again if the write fails.
    async fn send_registered(&self, tag: u64, sentence: &Sentence) -> Result<()> {
        if let Err(e) = self.shared.connection.send(sentence).await {
            self.shared.with_state(|state| state.abandon(tag));
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for AddressListMirror {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Store for AddressListMirror {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn snapshot(&self) -> BoxFuture<'_, Entries> {
        Box::pin(async move { Ok(self.shared.state.lock().entries()) })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self
                .shared
                .state
                .lock()
                .get(&key)
                .map(|record| record.value.clone()))
        })
    }

    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let shared = &self.shared;
            let (tag, sentence) =
                shared.with_state(|state| state.prepare_set(&key, &value, shared.timeout.as_deref()));
            debug!(store = %shared.name, key = %key, value = %value, tag, "Sending set");
            self.send_registered(tag, &sentence).await
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let shared = &self.shared;
            let Some((tag, sentence)) = shared.with_state(|state| state.prepare_delete(&key)) else {
                debug!(store = %shared.name, key = %key, "Delete of unmirrored key");
                return Ok(());
            };
            debug!(store = %shared.name, key = %key, tag, "Sending remove");
            self.send_registered(tag, &sentence).await
        })
    }

    fn watch(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.shared.changed.notified().await;
            Ok(true)
        })
    }

    fn drain(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut pending = self.shared.pending_tx.subscribe();
            pending
                .wait_for(|count| *count == 0)
                .await
                .map_err(|_| MirrorError::Shutdown)?;
            Ok(())
        })
    }

    fn lock(&self) -> Pin<Box<dyn Future<Output = StoreGuard> + Send + '_>> {
        Box::pin(self.shared.lock.acquire())
    }
}
