// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The mirror's reader task.
//!
//! Each session: acquire the store lock, connect, start the change stream,
//! request the snapshot, then read replies until the session fails. The lock
//! is taken before connecting so that no synchronization pass can issue
//! commands on a session whose replies nobody is reading yet.
//!
//! Once a sweep has begun, the lock stays with the reader until a snapshot
//! completes, across any number of lost sessions and failed connects. A
//! failed connect from a finished sweep gives the lock back during the
//! reconnect delay.

use super::{commands, Shared};
use crate::error::Result;
use crate::metrics;
use crate::routeros::sentence::Reply;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// Run sessions forever, rebuilding all state after each loss.
pub(super) async fn run(shared: Arc<Shared>) {
    let span = info_span!("mirror", store = %shared.name, device = %shared.target());
    async move {
        let delay = shared.connection.policy().reconnect_delay;
        loop {
            if let Err(e) = run_session(&shared).await {
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Session lost");
            }
            shared.end_session().await;
            metrics::record_reconnect(shared.target());
            tokio::time::sleep(delay).await;
        }
    }
    .instrument(span)
    .await
}

async fn run_session(shared: &Shared) -> Result<Infallible> {
    let guard = if shared.sweep_pending() {
        None
    } else {
        Some(shared.lock.acquire().await)
    };

    let mut reader = match shared.connection.connect().await {
        Ok(reader) => {
            metrics::record_session_start(shared.target(), true);
            reader
        }
        Err(e) => {
            metrics::record_session_start(shared.target(), false);
            return Err(e);
        }
    };

    shared.begin_sweep(guard);
    shared.connection.send(&commands::listen()).await?;
    shared.connection.send(&commands::getall()).await?;
    debug!("Reconciliation started");

    loop {
        let sentence = reader.next().await?;
        let reply = Reply::parse(&sentence);
        if let Some(class) = reply.tag_class() {
            metrics::record_sentence(shared.target(), class.label());
        }
        shared.handle(&reply)?;
    }
}

