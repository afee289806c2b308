// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror and synchronizer.
//!
//! Errors are categorized by where they originate (configuration, the
//! RouterOS session, the filesystem) and carry enough context to be logged
//! without a backtrace.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Config` | No | Missing or invalid configuration (fatal at startup) |
//! | `Connection` | Yes | Dial failure, connection reset, read/write failure |
//! | `NotConnected` | Yes | Write attempted while no session is up |
//! | `Login` | Yes | Device rejected the credentials |
//! | `ProtocolFatal` | No | Device sent `!fatal`; it closes the session itself |
//! | `StreamEnded` | Yes | Snapshot or change stream job stopped early |
//! | `Trap` | No | Device rejected one command (`!trap`) |
//! | `UnknownTag` | No | Reply for a tag nobody is waiting on (benign) |
//! | `MalformedSentence` | Yes | Stream could not be decoded |
//! | `NotAnEntry` | No | Directory entry is not a symbolic link |
//! | `KeyNotFound` | No | Key is not present in the store |
//! | `Io` | Yes | Local filesystem failure |
//! | `Shutdown` | No | Process is shutting down |
//!
//! Retryable errors are recovered by reconnecting: when a reply yields one,
//! the mirror's reader tears the session down and rebuilds it. The others
//! are logged and the session carries on.
//!
//! # Propagation
//!
//! Transport and protocol errors never leave the mirror's reader task; they
//! are turned into disconnect-and-rebuild. Synchronization-pass errors are
//! logged by the synchronizer and followed by a backoff. Only `Config`
//! terminates the process.

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring or synchronizing stores.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection to a device failed or dropped.
    #[error("Connection error ({target}): {message}")]
    Connection {
        target: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A command was issued while no session is established.
    #[error("Not connected to {target}")]
    NotConnected { target: String },

    /// The device refused the login.
    #[error("Login to {target} failed: {message}")]
    Login { target: String, message: String },

    /// The device sent `!fatal`; the session is about to be closed remotely.
    #[error("Fatal reply from device: {message}")]
    ProtocolFatal { message: String },

    /// The device stopped a long-running job (`FETCH` or `LISTEN`).
    #[error("Device ended the {job} job: {message}")]
    StreamEnded { job: String, message: String },

    /// The device rejected a single command.
    #[error("Command {tag} rejected: {message}")]
    Trap { tag: String, message: String },

    /// A reply carried a tag with no pending command.
    ///
    /// Benign: typically an acknowledgment from before a reconnect.
    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    /// The byte stream could not be decoded into sentences.
    #[error("Malformed sentence: {0}")]
    MalformedSentence(String),

    /// A directory entry that should be a symbolic link is something else.
    ///
    /// Distinct from [`MirrorError::KeyNotFound`]: the key exists but cannot
    /// be managed.
    #[error("Not a symbolic link: {path}")]
    NotAnEntry { path: String },

    /// The key does not exist in the store.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Local filesystem failure.
    #[error("I/O error ({operation}): {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl MirrorError {
    /// Create a connection error from an I/O error.
    pub fn connection(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            target: target.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a connection error without source.
    pub fn connection_msg(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a filesystem error.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::NotConnected { .. } => true,
            Self::Login { .. } => true, // device may still be booting
            Self::StreamEnded { .. } => true,
            Self::MalformedSentence(_) => true, // reconnect resyncs the stream
            Self::Io { .. } => true,
            Self::Config(_) => false,
            Self::ProtocolFatal { .. } => false, // device hangs up on its own
            Self::Trap { .. } => false,
            Self::UnknownTag(_) => false,
            Self::NotAnEntry { .. } => false,
            Self::KeyNotFound(_) => false,
            Self::Shutdown => false,
        }
    }
}
