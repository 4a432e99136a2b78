//! Process-wide status/property store. Models the small set of
//! system-property-like flags the mux coordinates through: filter status,
//! reference count, a cleanup request, and a start-hci request.
//!
//! Production builds talk to the platform property store via shell-outs
//! to `getprop`/`setprop`; tests use an in-memory stand-in so the mux core
//! can be exercised without a real property service present.

use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;

use crate::config::property_keys;

/// A key/value store for the small number of status flags the mux reads
/// and writes. Implementors must make `get`/`set` safe to call from any of
/// the mux's threads.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);

    /// Convenience: `get` parsed as the reference count, defaulting to 0.
    fn ref_count(&self) -> i64 {
        self.get(property_keys::REF_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn set_ref_count(&self, value: i64) {
        self.set(property_keys::REF_COUNT, &value.to_string());
    }

    fn hci_filter_status(&self) -> String {
        self.get(property_keys::HCI_FILTER_STATUS).unwrap_or_default()
    }

    fn set_hci_filter_status(&self, value: &str) {
        self.set(property_keys::HCI_FILTER_STATUS, value);
    }
}

/// Shells out to the platform's `getprop`/`setprop` binaries. Mirrors the
/// reference daemon's use of the system property service: this process
/// does not link against a property-service client library, it invokes
/// the same command-line tools an operator would.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellPropertyStore;

impl PropertyStore for ShellPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        let output = Command::new("getprop").arg(key).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn set(&self, key: &str, value: &str) {
        match Command::new("setprop").arg(key).arg(value).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                log::warn!(target: "wcnss_mux::status", "setprop {key}={value} exited with {status}");
            }
            Err(e) => {
                log::warn!(target: "wcnss_mux::status", "setprop {key}={value} failed: {e}");
            }
        }
    }
}

/// In-memory property store for tests: no subprocess, no platform
/// dependency, same trait surface.
#[derive(Debug, Default)]
pub struct InMemoryPropertyStore {
    values: Mutex<HashMap<String, String>>,
}

impl PropertyStore for InMemoryPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}
