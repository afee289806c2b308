//! # Mirror Sync
//!
//! Keeps two key-value stores in agreement: a RouterOS firewall address-list,
//! mirrored locally over the device API, and a directory of symbolic links.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              mirror-sync                                  │
//! │                                                                           │
//! │  ┌────────────────┐   watch()   ┌──────────────┐   watch()   ┌─────────┐  │
//! │  │ DirectoryStore │────────────►│ Synchronizer │◄────────────│ Address │  │
//! │  │ (symlinks)     │◄────────────│ diff + apply │────────────►│ List    │  │
//! │  └────────────────┘  set/delete └──────────────┘  set/delete │ Mirror  │  │
//! │                                                   + drain()  └────┬────┘  │
//! │                                                                   │       │
//! └───────────────────────────────────────────────────────────────────┼───────┘
//!                                                                     ▼
//!                                                     RouterOS API (LISTEN, FETCH,
//!                                                     tagged add/set/remove)
//! ```
//!
//! Either store can be the source; the destination is made equal to it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mirror_sync::{MirrorConfig, Registry, Synchronizer};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> mirror_sync::Result<()> {
//!     let registry = Registry::new(MirrorConfig::load("disy.yml")?);
//!     let source = registry.build("blocked_dir").await?;
//!     let dest = registry.build("blocked_list").await?;
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     Synchronizer::new(source, dest, registry.pass_timing())
//!         .run(shutdown_rx)
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod registry;
pub mod resilience;
pub mod routeros;
pub mod store;
pub mod synchronizer;

// Re-exports for convenience
pub use config::{MirrorConfig, StoreConfig, SyncSettings};
pub use directory::DirectoryStore;
pub use error::{MirrorError, Result};
pub use mirror::{AddressListMirror, MirrorSettings};
pub use registry::Registry;
pub use resilience::{PassTiming, RetryPolicy};
pub use store::{MemoryStore, Store, StoreGuard, StoreLock};
pub use synchronizer::{SyncReport, Synchronizer};
