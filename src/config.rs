//! Configuration for the mirror and synchronizer.
//!
//! Configuration is read once at startup from a YAML file (`disy.yml` by
//! default) and handed to the [`Registry`](crate::registry::Registry), which
//! builds the stores named on the command line.
//!
//! # Configuration Structure
//!
//! ```text
//! MirrorConfig
//! ├── log_file: Option<String>        # Log to this file instead of stderr
//! ├── settings: SyncSettings          # Delays and timeouts
//! ├── routeros: {name → DeviceConfig} # Devices and credentials
//! └── map: {name → StoreConfig}       # Stores selectable as source/dest
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! settings:
//!   debounce: "1s"
//!   reconnect_delay: "1s"
//!
//! routeros:
//!   gw:
//!     address: 192.0.2.1
//!     username: admin
//!     password: secret
//!
//! map:
//!   blocked_dir:
//!     type: directory
//!     path: /srv/blocked
//!   blocked_list:
//!     type: address_list
//!     routeros: gw
//!     timeout: 1d
//! ```

use crate::error::{MirrorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "disy.yml";

/// Values not matching this pattern are invisible to a store.
pub const DEFAULT_PATTERN: &str = r".+_test$";

/// RouterOS API (plain-text) port.
pub const DEFAULT_API_PORT: u16 = 8728;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Append log output to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<String>,

    /// Delays and timeouts.
    #[serde(default)]
    pub settings: SyncSettings,

    /// Devices by name, referenced from `address_list` stores.
    #[serde(default)]
    pub routeros: HashMap<String, DeviceConfig>,

    /// Stores by name, selectable as source or destination.
    #[serde(default)]
    pub map: HashMap<String, StoreConfig>,
}

impl MirrorConfig {
    /// Parse a configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty file is a valid (empty) configuration.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| MirrorError::Config(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Look up a store by name.
    pub fn store(&self, name: &str) -> Result<&StoreConfig> {
        self.map
            .get(name)
            .ok_or_else(|| MirrorError::Config(format!("missing configuration for map {name}")))
    }

    /// Look up a device by name.
    pub fn device(&self, name: &str) -> Result<&DeviceConfig> {
        self.routeros.get(name).ok_or_else(|| {
            MirrorError::Config(format!("missing configuration for RouterOS {name}"))
        })
    }

    /// Check that a store can be built: its pattern compiles and any device
    /// it references exists.
    pub fn validate_store(&self, name: &str) -> Result<()> {
        match self.store(name)? {
            StoreConfig::Directory(dir) => {
                compile_pattern(dir.pattern.as_deref())?;
            }
            StoreConfig::AddressList(list) => {
                compile_pattern(list.pattern.as_deref())?;
                self.device(&list.routeros)?;
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Delays and timeouts, as human-readable durations (`"1s"`, `"500ms"`).
///
/// Unparseable values fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Pause after a successful synchronization pass.
    #[serde(default = "default_debounce")]
    pub debounce: String,

    /// Pause after a failed synchronization pass.
    #[serde(default = "default_error_backoff")]
    pub pass_error_backoff: String,

    /// Pause after a store's `watch()` fails.
    #[serde(default = "default_error_backoff")]
    pub watch_error_backoff: String,

    /// Pause between losing a device session and reconnecting.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: String,

    /// Timeout for dialing and logging in to a device.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// How often directory stores check their mtime.
    #[serde(default = "default_poll_interval")]
    pub directory_poll_interval: String,
}

fn default_debounce() -> String {
    "1s".to_string()
}

fn default_error_backoff() -> String {
    "5s".to_string()
}

fn default_reconnect_delay() -> String {
    "1s".to_string()
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            pass_error_backoff: default_error_backoff(),
            watch_error_backoff: default_error_backoff(),
            reconnect_delay: default_reconnect_delay(),
            connect_timeout: default_connect_timeout(),
            directory_poll_interval: default_poll_interval(),
        }
    }
}

impl SyncSettings {
    /// Near-zero delays for tests.
    pub fn for_testing() -> Self {
        Self {
            debounce: "1ms".to_string(),
            pass_error_backoff: "5ms".to_string(),
            watch_error_backoff: "5ms".to_string(),
            reconnect_delay: "5ms".to_string(),
            connect_timeout: "500ms".to_string(),
            directory_poll_interval: "10ms".to_string(),
        }
    }

    pub fn debounce_duration(&self) -> Duration {
        parse_duration_or(&self.debounce, Duration::from_secs(1))
    }

    pub fn pass_error_backoff_duration(&self) -> Duration {
        parse_duration_or(&self.pass_error_backoff, Duration::from_secs(5))
    }

    pub fn watch_error_backoff_duration(&self) -> Duration {
        parse_duration_or(&self.watch_error_backoff, Duration::from_secs(5))
    }

    pub fn reconnect_delay_duration(&self) -> Duration {
        parse_duration_or(&self.reconnect_delay, Duration::from_secs(1))
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.connect_timeout, Duration::from_secs(10))
    }

    pub fn directory_poll_interval_duration(&self) -> Duration {
        parse_duration_or(&self.directory_poll_interval, Duration::from_secs(1))
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DeviceConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// A RouterOS device reachable over the plain-text API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host name or IP address.
    pub address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    pub username: String,

    pub password: String,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

impl DeviceConfig {
    /// `host:port`, as used for dialing and in log fields.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// One selectable store, discriminated by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// A directory of symbolic links (`key` = file name, `value` = target).
    Directory(DirectoryConfig),
    /// A RouterOS firewall address-list (`key` = address, `value` = list).
    AddressList(AddressListConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub path: PathBuf,

    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressListConfig {
    /// Name of the device in the `routeros` section.
    pub routeros: String,

    #[serde(default)]
    pub pattern: Option<String>,

    /// Passed verbatim as `=timeout=` on add and set (RouterOS syntax, e.g. `1d`).
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Compile a value pattern, anchored at the start of the value.
pub fn compile_pattern(pattern: Option<&str>) -> Result<Regex> {
    let pattern = pattern.unwrap_or(DEFAULT_PATTERN);
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| MirrorError::Config(format!("invalid pattern {pattern:?}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
