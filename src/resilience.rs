//! Resilience utilities: reconnect policy and synchronizer pacing.
//!
//! Recovery is deliberately simple: there is no cooperative cancellation and
//! no exponential growth. A lost device session is retried after a fixed
//! delay, forever, and a failed synchronization pass is followed by a longer
//! fixed pause.
//!
//! - [`RetryPolicy`]: reconnect delay and per-attempt connect timeout
//! - [`PassTiming`]: debounce and error backoffs for the synchronizer
//!
//! # Example
//!
//! ```rust
//! use mirror_sync::config::SyncSettings;
//! use mirror_sync::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::from_settings(&SyncSettings::default());
//! assert_eq!(policy.reconnect_delay, Duration::from_secs(1));
//! ```

use crate::config::SyncSettings;
use crate::error::{MirrorError, Result};
use std::future::Future;
use std::time::Duration;

/// How a device session is re-established after it is lost.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed pause between a lost session and the next connect attempt.
    pub reconnect_delay: Duration,

    /// Timeout for dialing plus login.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::daemon()
    }
}

impl RetryPolicy {
    /// Long-running daemon: one second between attempts, forever.
    pub fn daemon() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Fast retries for tests.
    pub fn testing() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5),
            connect_timeout: Duration::from_millis(500),
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            reconnect_delay: settings.reconnect_delay_duration(),
            connect_timeout: settings.connect_timeout_duration(),
        }
    }

    /// Run a connect attempt under [`connect_timeout`](Self::connect_timeout).
    pub async fn within_connect_timeout<T, F>(&self, target: &str, attempt: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(MirrorError::connection_msg(
                target,
                format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
            )),
        }
    }
}

/// Pacing of the synchronizer loop.
#[derive(Debug, Clone)]
pub struct PassTiming {
    /// Pause after a successful pass before accepting the next trigger.
    pub debounce: Duration,

    /// Pause after a failed pass.
    pub pass_error_backoff: Duration,

    /// Pause after a store's `watch()` fails, before signalling anyway.
    pub watch_error_backoff: Duration,
}

impl Default for PassTiming {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl PassTiming {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            debounce: settings.debounce_duration(),
            pass_error_backoff: settings.pass_error_backoff_duration(),
            watch_error_backoff: settings.watch_error_backoff_duration(),
        }
    }

    /// Near-zero pauses for tests.
    pub fn testing() -> Self {
        Self {
            debounce: Duration::from_millis(1),
            pass_error_backoff: Duration::from_millis(5),
            watch_error_backoff: Duration::from_millis(5),
        }
    }
}
