// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Builds configured stores by name.
//!
//! The registry is constructed once at startup from the parsed
//! [`MirrorConfig`] and handed whatever needs a store. Device transports are
//! created once per device name and shared by every address-list store on
//! that device; tests replace them with [`Registry::with_dialer`].

use crate::config::{compile_pattern, MirrorConfig, StoreConfig};
use crate::directory::DirectoryStore;
use crate::error::Result;
use crate::mirror::{AddressListMirror, MirrorSettings};
use crate::resilience::{PassTiming, RetryPolicy};
use crate::routeros::connection::{Credentials, DeviceConnection, Dialer, TcpDialer};
use crate::store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct Registry {
    config: MirrorConfig,
    dialers: Mutex<HashMap<String, Arc<dyn Dialer>>>,
}

impl Registry {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            dialers: Mutex::new(HashMap::new()),
        }
    }

    /// Use `dialer` for every session with `device`.
    pub fn with_dialer(self, device: impl Into<String>, dialer: Arc<dyn Dialer>) -> Self {
        self.dialers.lock().insert(device.into(), dialer);
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_settings(&self.config.settings)
    }

    pub fn pass_timing(&self) -> PassTiming {
        PassTiming::from_settings(&self.config.settings)
    }

    fn dialer(&self, device: &str, endpoint: String) -> Arc<dyn Dialer> {
        let mut dialers = self.dialers.lock();
        let dialer = dialers
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(TcpDialer::new(endpoint)));
        Arc::clone(dialer)
    }

    /// Build the store configured under `name`.
    ///
    /// Address-list stores start their reader task, so this must run inside
    /// a Tokio runtime.
    pub async fn build(&self, name: &str) -> Result<Arc<dyn Store>> {
        self.config.validate_store(name)?;
        match self.config.store(name)? {
            StoreConfig::Directory(dir) => {
                let pattern = compile_pattern(dir.pattern.as_deref())?;
                let poll = self.config.settings.directory_poll_interval_duration();
                let store = DirectoryStore::open(name, &dir.path, pattern, poll).await?;
                info!(store = name, path = %dir.path.display(), "Directory store opened");
                Ok(Arc::new(store))
            }
            StoreConfig::AddressList(list) => {
                let device = self.config.device(&list.routeros)?;
                let connection = DeviceConnection::new(
                    list.routeros.clone(),
                    self.dialer(&list.routeros, device.endpoint()),
                    Credentials::from(device),
                    self.retry_policy(),
                );
                let settings = MirrorSettings {
                    name: name.to_string(),
                    pattern: compile_pattern(list.pattern.as_deref())?,
                    timeout: list.timeout.clone(),
                };
                info!(store = name, device = %list.routeros, endpoint = %device.endpoint(), "Address-list mirror started");
                Ok(Arc::new(AddressListMirror::start(connection, settings)))
            }
        }
    }
}
