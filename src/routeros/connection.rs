// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A session with one RouterOS device.
//!
//! The transport is opened through a [`Dialer`] so tests can substitute an
//! in-memory duplex for TCP. [`DeviceConnection::connect`] dials, logs in,
//! keeps the sending half for [`send`](DeviceConnection::send) and hands the
//! receiving half to the caller, which owns the read loop.
//!
//! # Connection Lifecycle
//!
//! ```text
//! ┌──────────────┐     connect()     ┌───────────┐
//! │ Disconnected │ ───────────────►  │ Logged in │
//! └──────────────┘                   └───────────┘
//!        ▲                                 │
//!        │  write error / disconnect()     │
//!        └─────────────────────────────────┘
//! ```
//!
//! Writes are serialized by an async mutex around the sending half. A write
//! issued while disconnected fails with [`MirrorError::NotConnected`]; a
//! failed write drops the sending half, so later writes fail fast until the
//! reader task reconnects.

use super::codec::{SentenceReader, SentenceWriter};
use super::sentence::{Command, Marker, Reply, Sentence};
use crate::config::DeviceConfig;
use crate::error::{MirrorError, Result};
use crate::resilience::RetryPolicy;
use crate::store::BoxFuture;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the byte transport to a device.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self) -> BoxFuture<'_, (BoxedReader, BoxedWriter)>;
}

/// Dials `host:port` over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    endpoint: String,
}

impl TcpDialer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> BoxFuture<'_, (BoxedReader, BoxedWriter)> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.endpoint)
                .await
                .map_err(|e| MirrorError::connection(&self.endpoint, e))?;
            stream
                .set_nodelay(true)
                .map_err(|e| MirrorError::connection(&self.endpoint, e))?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read) as BoxedReader, Box::new(write) as BoxedWriter))
        })
    }
}

/// Login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<&DeviceConfig> for Credentials {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            username: device.username.clone(),
            password: device.password.clone(),
        }
    }
}

/// The sending side of a device session plus the means to re-establish it.
pub struct DeviceConnection {
    target: String,
    dialer: Arc<dyn Dialer>,
    credentials: Credentials,
    policy: RetryPolicy,
    writer: Mutex<Option<SentenceWriter<BoxedWriter>>>,
}

impl DeviceConnection {
    pub fn new(
        target: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            target: target.into(),
            dialer,
            credentials,
            policy,
            writer: Mutex::new(None),
        }
    }

    /// Device name, used in log fields and errors.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dial and log in, replacing any previous session.
    ///
    /// Returns the receiving half; the caller must keep reading from it for
    /// replies to be processed.
    pub async fn connect(&self) -> Result<SentenceReader<BoxedReader>> {
        self.disconnect().await;

        let (reader, writer) = self
            .policy
            .within_connect_timeout(&self.target, self.open_session())
            .await?;

        *self.writer.lock().await = Some(writer);
        info!(device = %self.target, "Logged in");
        Ok(reader)
    }

    async fn open_session(
        &self,
    ) -> Result<(SentenceReader<BoxedReader>, SentenceWriter<BoxedWriter>)> {
        let (read, write) = self.dialer.dial().await?;
        let mut reader = SentenceReader::new(read, self.target.clone());
        let mut writer = SentenceWriter::new(write, self.target.clone());

        let login = Command::new("/login")
            .attr("name", &self.credentials.username)
            .attr("password", &self.credentials.password)
            .build();
        writer.write(&login).await?;

        loop {
            let reply = Reply::parse(&reader.next().await?);
            match reply.marker() {
                Marker::Done => return Ok((reader, writer)),
                Marker::Trap | Marker::Fatal => {
                    return Err(MirrorError::Login {
                        target: self.target.clone(),
                        message: reply.message(),
                    })
                }
                _ => debug!(device = %self.target, reply = %reply, "Ignoring reply during login"),
            }
        }
    }

    /// Drop the sending half. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
            debug!(device = %self.target, "Disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write one sentence on the current session.
    ///
    /// Fails with [`MirrorError::NotConnected`] when no session is up. A
    /// write failure tears the session down.
    pub async fn send(&self, sentence: &Sentence) -> Result<()> {
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(MirrorError::NotConnected {
                target: self.target.clone(),
            });
        };
        if let Err(e) = writer.write(sentence).await {
            warn!(device = %self.target, error = %e, "Write failed, dropping session");
            *slot = None;
            return Err(e);
        }
        Ok(())
    }
}
