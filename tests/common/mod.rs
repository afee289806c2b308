//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - An in-memory RouterOS device: scripted sessions and a simulated router
//! - A recording store for synchronizer assertions
//! - Polling helpers

#![allow(dead_code)]

pub mod fake_device;
pub mod mock_store;

pub use fake_device::*;
pub use mock_store::*;

use std::time::{Duration, Instant};

/// Upper bound for any single step a test waits on.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll `condition` every few milliseconds until it holds.
///
/// Panics with `what` if it does not hold within [`STEP_TIMEOUT`].
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + STEP_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Build an owned map from `(key, value)` pairs.
pub fn map(pairs: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
